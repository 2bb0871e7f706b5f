//! `sweeper-core`: domain foundation for the deletion backlog.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, backlog records and their claim/process lifecycle, and the
//! file status written to hierarchy rows.

pub mod backlog;
pub mod error;
pub mod hierarchy;
pub mod id;

pub use backlog::{BacklogRecord, BacklogState, DeletedFile, DeletedFolder};
pub use error::{DomainError, DomainResult};
pub use hierarchy::FileStatus;
pub use id::EntityId;
