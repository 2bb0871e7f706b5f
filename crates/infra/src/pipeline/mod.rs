//! Claim → publish → consume pipeline.
//!
//! - [`ClaimingIterator`] pages a backlog table and claims each page before yielding it
//! - [`Producer`] publishes claimed items, blocking while the queue is at capacity
//! - [`Consumer`] pulls messages under a concurrency bound and settles them by handler outcome
//!
//! None of the components own a connection: the process shell builds a
//! [`PipelineContext`] and hands the same handles to whichever role it runs.

pub mod claiming;
pub mod consumer;
pub mod events;
pub mod producer;

use std::sync::Arc;

use thiserror::Error;

use sweeper_queue::{CodecError, QueueError};

use crate::store::StoreError;

pub use claiming::{ClaimMode, ClaimingIterator, ItemSource, PageChunks};
pub use consumer::{Consumer, ConsumerConfig, ConsumerReport, ConsumerStats, FnHandler, TaskHandler, handler_fn};
pub use events::{PipelineEvent, PipelineObserver, RecordingObserver, TracingObserver};
pub use producer::{Producer, ProducerConfig, ProducerReport};

/// Fatal pipeline error. Handler failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Store and queue handles shared by the pipeline components of one process.
#[derive(Debug)]
pub struct PipelineContext<S: ?Sized, Q: ?Sized> {
    pub store: Arc<S>,
    pub queue: Arc<Q>,
}

impl<S: ?Sized, Q: ?Sized> PipelineContext<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>) -> Self {
        Self { store, queue }
    }
}

impl<S: ?Sized, Q: ?Sized> Clone for PipelineContext<S, Q> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
        }
    }
}
