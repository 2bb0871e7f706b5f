//! In-memory queue for tests and local runs.
//!
//! Not for long-lived processes: the publish depth log, the settlement
//! counts and the rejected list are kept for assertions and never trimmed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::queue::{Delivery, Queue, QueueError};

/// Per-queue counters exposed for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting for delivery.
    pub ready: usize,
    /// Messages pulled but not yet settled.
    pub unacked: usize,
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(String, Vec<u8>)>,
    unacked: HashMap<String, Vec<u8>>,
    rejected: Vec<(String, Vec<u8>)>,
    /// Depth observed right before each publish was accepted.
    depth_at_publish: Vec<u64>,
    settled: HashMap<String, (u32, u32)>,
    next_tag: u64,
    published: u64,
    acked: u64,
    nacked: u64,
}

/// In-memory FIFO queue.
///
/// - No IO
/// - Settling an unknown (or already settled) tag fails, like a broker would
/// - `nack` moves the message to a rejected list, never back to `ready`
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock().unwrap();
        f(queues.entry(queue.to_string()).or_default())
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        self.with_queue(queue, |q| QueueStats {
            ready: q.ready.len(),
            unacked: q.unacked.len(),
            published: q.published,
            acked: q.acked,
            nacked: q.nacked,
        })
    }

    /// How many times the message with `tag` was acked and nacked.
    pub fn settlements(&self, queue: &str, tag: &str) -> (u32, u32) {
        self.with_queue(queue, |q| q.settled.get(tag).copied().unwrap_or_default())
    }

    /// Queue depth observed before each accepted publish, in order.
    pub fn depth_at_publish(&self, queue: &str) -> Vec<u64> {
        self.with_queue(queue, |q| q.depth_at_publish.clone())
    }

    /// Bodies of messages discarded by `nack`.
    pub fn rejected(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.rejected.iter().map(|(_, b)| b.clone()).collect())
    }

    fn settle(&self, delivery: &Delivery, ack: bool) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.with_queue(delivery.queue(), |q| {
            let body = q
                .unacked
                .remove(delivery.tag())
                .ok_or_else(|| QueueError::UnknownDelivery {
                    queue: delivery.queue().to_string(),
                    tag: delivery.tag().to_string(),
                })?;

            let entry = q.settled.entry(delivery.tag().to_string()).or_default();
            if ack {
                entry.0 += 1;
                q.acked += 1;
            } else {
                entry.1 += 1;
                q.nacked += 1;
                q.rejected.push((delivery.tag().to_string(), body));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.with_queue(queue, |_| ());
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.with_queue(queue, |q| {
            q.depth_at_publish.push(q.ready.len() as u64);
            q.next_tag += 1;
            let tag = q.next_tag.to_string();
            q.ready.push_back((tag, body));
            q.published += 1;
        });
        Ok(())
    }

    async fn pull(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        self.ensure_open()?;
        Ok(self.with_queue(queue, |q| {
            q.ready.pop_front().map(|(tag, body)| {
                q.unacked.insert(tag.clone(), body.clone());
                Delivery::new(queue, tag, body)
            })
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, true)
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, false)
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        self.ensure_open()?;
        Ok(self.with_queue(queue, |q| q.ready.len() as u64))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
