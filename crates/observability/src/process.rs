//! Per-process identity attached to every log line.

use std::fmt;

use tracing::{Span, info_span};
use uuid::Uuid;

/// Random identifier of one worker process, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity(Uuid);

impl ProcessIdentity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }

    /// Root span for a process running `task` in `role` (`producer`/`consumer`).
    pub fn span(&self, role: &str, task: &str) -> Span {
        info_span!("worker", process_id = %self.0, role, task)
    }
}

impl Default for ProcessIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
