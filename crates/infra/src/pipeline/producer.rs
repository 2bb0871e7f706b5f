//! Producer: publishes claimed items while honouring a queue depth ceiling.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use sweeper_queue::{Queue, encode};

use super::PipelineError;
use super::claiming::ItemSource;
use super::events::{PipelineEvent, PipelineObserver, TracingObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Publishing pauses while the queue holds this many messages or more.
    pub max_queue_size: u64,
    /// Sleep between depth checks while the queue is full.
    pub full_wait: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            full_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub published: u64,
    pub full_waits: u64,
}

/// Single publishing loop. No internal parallelism: backpressure is applied
/// by blocking before each publish until the depth is below the ceiling.
///
/// On cancellation the items the source has already claimed are published
/// before `run` returns, even if the queue is full.
pub struct Producer<Q: ?Sized, S> {
    queue: Arc<Q>,
    queue_name: String,
    source: S,
    config: ProducerConfig,
    observer: Arc<dyn PipelineObserver>,
}

impl<Q, S> Producer<Q, S>
where
    Q: Queue + ?Sized,
    S: ItemSource,
{
    pub fn new(queue: Arc<Q>, queue_name: impl Into<String>, source: S, config: ProducerConfig) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            source,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Publish until the source ends or `cancel` fires.
    ///
    /// Any store, codec or broker error ends the loop and is returned.
    #[instrument(skip_all, fields(queue = %self.queue_name, max_queue_size = self.config.max_queue_size), err)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ProducerReport, PipelineError> {
        self.queue.declare(&self.queue_name).await?;
        let mut report = ProducerReport::default();

        loop {
            if !self.wait_for_capacity(&cancel, &mut report).await? {
                break;
            }

            let Some(item) = self.source.next_item(&cancel).await? else {
                break;
            };
            self.publish(&item, &mut report).await?;
        }

        // Already claimed: published regardless of capacity.
        let claimed = self.source.take_claimed();
        if !claimed.is_empty() {
            info!(remaining = claimed.len(), "publishing claimed items before stopping");
            for item in &claimed {
                self.publish(item, &mut report).await?;
            }
        }

        info!(
            published = report.published,
            full_waits = report.full_waits,
            "producer stopped"
        );
        Ok(report)
    }

    async fn publish(&self, item: &S::Item, report: &mut ProducerReport) -> Result<(), PipelineError> {
        let body = encode(item)?;
        let rendered = String::from_utf8_lossy(&body).into_owned();
        self.queue.publish(&self.queue_name, body).await?;
        report.published += 1;

        self.observer.on_event(&PipelineEvent::Enqueued {
            queue: self.queue_name.clone(),
            body: rendered,
        });
        Ok(())
    }

    /// Block until the queue depth is below the ceiling.
    ///
    /// Returns `false` if cancelled while waiting.
    async fn wait_for_capacity(
        &self,
        cancel: &CancellationToken,
        report: &mut ProducerReport,
    ) -> Result<bool, PipelineError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let depth = self.queue.depth(&self.queue_name).await?;
            if depth < self.config.max_queue_size {
                return Ok(true);
            }

            report.full_waits += 1;
            self.observer.on_event(&PipelineEvent::QueueFull {
                queue: self.queue_name.clone(),
                depth,
                max: self.config.max_queue_size,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.config.full_wait) => {}
            }
        }
    }
}
