//! Redis Streams-backed work queue.
//!
//! ## Layout
//!
//! - **Stream key**: the queue name itself
//! - **Consumer group**: `<queue>:workers`, created on `declare` with `MKSTREAM`
//! - **Rejected stream**: `<queue>:rejected`, where `nack` copies failed bodies,
//!   trimmed to roughly the newest [`REJECTED_MAXLEN`] entries
//!
//! Settled entries are `XDEL`eted, so `XLEN` minus the group's pending count
//! is the number of entries still waiting for delivery. Nothing is ever
//! claimed back from the pending list: a nacked message is gone for good.

use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamPendingReply, StreamReadReply};
use tracing::{debug, instrument, warn};

use sweeper_queue::{Delivery, Queue, QueueError};

const BODY_FIELD: &str = "body";

/// Approximate cap on `<queue>:rejected`; older entries are trimmed by Redis.
pub const REJECTED_MAXLEN: u64 = 10_000;

#[derive(Debug)]
pub struct RedisStreamsQueue {
    conn: Mutex<Option<MultiplexedConnection>>,
    consumer_name: String,
}

impl RedisStreamsQueue {
    /// Connect to Redis. `consumer_name` identifies this process within each group.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        consumer_name: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            consumer_name: consumer_name.into(),
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Connection("connection lock poisoned".to_string()))?
            .clone()
            .ok_or(QueueError::Closed)
    }
}

fn group_name(queue: &str) -> String {
    format!("{queue}:workers")
}

fn rejected_key(queue: &str) -> String {
    format!("{queue}:rejected")
}

/// `XADD` copying a failed delivery into the rejected stream.
fn rejected_entry(delivery: &Delivery) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(rejected_key(delivery.queue()))
        .arg("MAXLEN")
        .arg("~")
        .arg(REJECTED_MAXLEN)
        .arg("*")
        .arg(BODY_FIELD)
        .arg(delivery.body())
        .arg("source_id")
        .arg(delivery.tag());
    cmd
}

fn command_error(command: &str, err: redis::RedisError) -> QueueError {
    QueueError::Command(format!("{command} failed: {err}"))
}

#[async_trait]
impl Queue for RedisStreamsQueue {
    #[instrument(skip(self), err)]
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = self.connection()?;

        // "0" so a freshly created group also sees entries published before it.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(group_name(queue))
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(queue, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    #[instrument(skip(self, body), fields(bytes = body.len()), err)]
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))?;
        Ok(())
    }

    async fn pull(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection()?;

        // No BLOCK: an empty stream answers nil right away.
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group_name(queue))
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(queue)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let body: Vec<u8> = match entry.get(BODY_FIELD) {
            Some(body) => body,
            None => {
                warn!(queue, id = %entry.id, "stream entry without a body field");
                Vec::new()
            }
        };

        Ok(Some(Delivery::new(queue, entry.id, body)))
    }

    #[instrument(skip(self, delivery), fields(queue = delivery.queue(), tag = delivery.tag()), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let (acked, _deleted): (u64, u64) = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(delivery.queue())
            .arg(group_name(delivery.queue()))
            .arg(delivery.tag())
            .cmd("XDEL")
            .arg(delivery.queue())
            .arg(delivery.tag())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XACK/XDEL", e))?;

        if acked == 0 {
            return Err(QueueError::UnknownDelivery {
                queue: delivery.queue().to_string(),
                tag: delivery.tag().to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(queue = delivery.queue(), tag = delivery.tag()), err)]
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let (_rejected_id, acked, _deleted): (String, u64, u64) = redis::pipe()
            .atomic()
            .add_command(rejected_entry(delivery))
            .cmd("XACK")
            .arg(delivery.queue())
            .arg(group_name(delivery.queue()))
            .arg(delivery.tag())
            .cmd("XDEL")
            .arg(delivery.queue())
            .arg(delivery.tag())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD/XACK/XDEL", e))?;

        if acked == 0 {
            return Err(QueueError::UnknownDelivery {
                queue: delivery.queue().to_string(),
                tag: delivery.tag().to_string(),
            });
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection()?;
        let (len, pending): (u64, StreamPendingReply) = redis::pipe()
            .cmd("XLEN")
            .arg(queue)
            .cmd("XPENDING")
            .arg(queue)
            .arg(group_name(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XLEN/XPENDING", e))?;

        Ok(len.saturating_sub(pending.count() as u64))
    }

    async fn close(&self) -> Result<(), QueueError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| QueueError::Connection("connection lock poisoned".to_string()))?
            .take();
        if conn.is_none() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_namespaced_by_queue() {
        assert_eq!(group_name("delete-files-production"), "delete-files-production:workers");
        assert_eq!(rejected_key("mark-deleted"), "mark-deleted:rejected");
    }

    #[test]
    fn rejected_stream_is_capped() {
        let delivery = Delivery::new("mark-deleted", "1700000000000-0", b"{}".to_vec());
        let packed = rejected_entry(&delivery).get_packed_command();
        let packed = String::from_utf8_lossy(&packed);

        assert!(packed.contains("mark-deleted:rejected"));
        assert!(packed.contains("MAXLEN\r\n$1\r\n~\r\n$5\r\n10000\r\n"));
        assert!(packed.contains("source_id"));
    }
}
