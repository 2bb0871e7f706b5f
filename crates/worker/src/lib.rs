//! Worker process shell: CLI, configuration, role runner and shutdown.

pub mod cli;
pub mod config;
pub mod runner;
pub mod shutdown;

pub use cli::{Cli, Role};
pub use config::{ConfigError, WorkerConfig};
pub use runner::{RoleReport, RoleRunner};
