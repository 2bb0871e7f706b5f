//! Infrastructure layer: drive database, broker, deletion gateway, and the
//! claim → publish → consume pipeline wired over them.

pub mod broker;
pub mod gateway;
pub mod pipeline;
pub mod store;
pub mod tasks;

pub use pipeline::{PipelineContext, PipelineError};
pub use store::{DriveStore, StoreError};
pub use tasks::TaskKind;
