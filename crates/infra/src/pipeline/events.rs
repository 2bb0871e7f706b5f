//! Structured pipeline events.
//!
//! Emitted synchronously at fixed points:
//! - `Enqueued` after every successful publish
//! - `QueueFull` on every backpressure wait
//! - `BacklogIdle` when a poll finds no eligible rows
//! - `HandlerFailed` when a message is negatively acknowledged

use std::sync::Mutex;

use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Enqueued {
        queue: String,
        body: String,
    },
    QueueFull {
        queue: String,
        depth: u64,
        max: u64,
    },
    BacklogIdle {
        source: &'static str,
    },
    HandlerFailed {
        queue: String,
        tag: String,
        error: String,
        body: String,
    },
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Enqueued { queue, body } => {
                info!(queue = %queue, item = %body, "enqueued item");
            }
            PipelineEvent::QueueFull { queue, depth, max } => {
                info!(queue = %queue, depth, max, "queue full, waiting");
            }
            PipelineEvent::BacklogIdle { source } => {
                debug!(source, "no data to process, waiting");
            }
            PipelineEvent::HandlerFailed {
                queue,
                tag,
                error,
                body,
            } => {
                error!(queue = %queue, tag = %tag, error = %error, item = %body, "error processing item");
            }
        }
    }
}

/// Keeps every event in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
