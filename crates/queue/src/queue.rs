//! Durable work queue abstraction (mechanics only).
//!
//! ## Delivery Guarantees
//!
//! The sweeper relies on a small contract:
//!
//! - `publish()` appends one message; a successful return means the broker accepted it
//! - `pull()` hands out at most one message, which stays owned by the caller until
//!   it is acknowledged or negatively acknowledged
//! - `ack()` removes the message permanently
//! - `nack()` discards the message; it is **never** redelivered
//! - `depth()` reports messages waiting for delivery (not those already handed out)
//!
//! Ordering beyond per-queue FIFO is not assumed.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// A message pulled from a queue, owned by the consumer until settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    queue: String,
    tag: String,
    body: Vec<u8>,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, tag: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            queue: queue.into(),
            tag: tag.into(),
            body,
        }
    }

    /// Name of the queue the message was pulled from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Broker-assigned delivery tag used to settle the message.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body rendered for logs (lossy UTF-8).
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Queue operation error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("unknown delivery tag {tag} on queue {queue}")]
    UnknownDelivery { queue: String, tag: String },

    #[error("queue connection closed")]
    Closed,
}

/// Durable message queue used between the producer and the consumer.
///
/// Implementations must be safe to share across tasks; the consumer settles
/// messages from concurrently running handlers.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Ensure the queue exists (idempotent).
    async fn declare(&self, queue: &str) -> Result<(), QueueError>;

    /// Append one message.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError>;

    /// Take the next message, if any, without waiting for one to arrive.
    async fn pull(&self, queue: &str) -> Result<Option<Delivery>, QueueError>;

    /// Settle a message as handled; it is removed permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Settle a message as failed without requeue; it is discarded.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of messages waiting to be delivered.
    async fn depth(&self, queue: &str) -> Result<u64, QueueError>;

    /// Close the underlying connection; later calls fail with [`QueueError::Closed`].
    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> Queue for Arc<Q>
where
    Q: Queue + ?Sized,
{
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        (**self).declare(queue).await
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        (**self).publish(queue, body).await
    }

    async fn pull(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        (**self).pull(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).nack(delivery).await
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        (**self).depth(queue).await
    }

    async fn close(&self) -> Result<(), QueueError> {
        (**self).close().await
    }
}
