//! Work queue port and message codec.
//!
//! The sweeper publishes backlog items to a durable queue and consumes them
//! with bounded concurrency. This crate holds the transport-agnostic side:
//! the [`Queue`] contract, the [`Delivery`] handed to consumers, the JSON
//! payload shapes, and an in-memory queue for tests/dev.

pub mod codec;
pub mod in_memory;
pub mod queue;

pub use codec::{Batch, CodecError, decode, encode};
pub use in_memory::{InMemoryQueue, QueueStats};
pub use queue::{Delivery, Queue, QueueError};
