//! Tracing setup and process-labelled logging shared by the sweeper binaries.

pub mod process;
pub mod subscriber;

pub use process::ProcessIdentity;

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init();
}
