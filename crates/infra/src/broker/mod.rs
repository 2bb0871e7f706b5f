//! Broker adapters implementing [`sweeper_queue::Queue`].
//!
//! Backends:
//! - `redis_streams`: Redis Streams with one consumer group per queue (feature `redis`)
//!
//! `sweeper_queue::InMemoryQueue` covers tests and local runs.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
