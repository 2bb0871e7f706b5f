//! Consumer: pulls messages under a concurrency bound and settles them.
//!
//! A permit is taken from a semaphore of `max_concurrent` slots *before*
//! each pull, and released only after the message is settled. At the bound
//! the loop is parked on the semaphore and no further messages leave the
//! queue.
//!
//! Outcomes:
//! - handler `Ok` → `ack`
//! - handler `Err`, panic, or undecodable payload → `nack` (never requeued) + `HandlerFailed`

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use sweeper_queue::{Delivery, Queue, decode};

use super::PipelineError;
use super::events::{PipelineEvent, PipelineObserver, TracingObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub max_concurrent: usize,
    /// Sleep after a pull that found the queue empty.
    pub idle_wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            idle_wait: Duration::from_secs(1),
        }
    }
}

/// Handles one decoded message. Any error is a failure; there is no retry.
#[async_trait]
pub trait TaskHandler<P>: Send + Sync + 'static {
    async fn handle(&self, payload: P) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<P, F, Fut> TaskHandler<P> for FnHandler<F>
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: P) -> anyhow::Result<()> {
        (self.0)(payload).await
    }
}

/// Live counters of a running consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    acked: AtomicU64,
    nacked: AtomicU64,
    settle_failures: AtomicU64,
}

impl ConsumerStats {
    /// Messages pulled and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> ConsumerReport {
        ConsumerReport {
            acked: self.acked(),
            nacked: self.nacked(),
            settle_failures: self.settle_failures.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight(),
        }
    }

    fn started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acked: u64,
    pub nacked: u64,
    /// Acks/nacks the broker refused.
    pub settle_failures: u64,
    pub peak_in_flight: usize,
}

pub struct Consumer<Q: ?Sized, H, P> {
    queue: Arc<Q>,
    queue_name: String,
    handler: Arc<H>,
    config: ConsumerConfig,
    observer: Arc<dyn PipelineObserver>,
    stats: Arc<ConsumerStats>,
    _payload: PhantomData<fn() -> P>,
}

impl<Q, H, P> Consumer<Q, H, P>
where
    Q: Queue + ?Sized + 'static,
    H: TaskHandler<P>,
    P: DeserializeOwned + Send + 'static,
{
    pub fn new(queue: Arc<Q>, queue_name: impl Into<String>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            handler: Arc::new(handler),
            config: ConsumerConfig {
                max_concurrent: config.max_concurrent.max(1),
                ..config
            },
            observer: Arc::new(TracingObserver),
            stats: Arc::new(ConsumerStats::default()),
            _payload: PhantomData,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until `cancel` fires, then wait for in-flight handlers to settle.
    ///
    /// A pull already in progress when `cancel` fires is completed and its
    /// message handled like any other.
    ///
    /// A broker error while pulling ends the loop; outstanding handlers are
    /// still drained before the error is returned.
    #[instrument(skip_all, fields(queue = %self.queue_name, max_concurrent = self.config.max_concurrent), err)]
    pub async fn run(self, cancel: CancellationToken) -> Result<ConsumerReport, PipelineError> {
        self.queue.declare(&self.queue_name).await?;

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut outcome: Result<(), PipelineError> = Ok(());

        loop {
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if cancel.is_cancelled() {
                break;
            }

            // Not raced against `cancel`: once the broker has handed a message
            // over it must be dispatched and settled.
            let pulled = self.queue.pull(&self.queue_name).await;

            let delivery = match pulled {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.idle_wait) => continue,
                    }
                }
                Err(err) => {
                    outcome = Err(err.into());
                    break;
                }
            };

            self.stats.started();
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let observer = Arc::clone(&self.observer);
            let stats = Arc::clone(&self.stats);

            tasks.spawn(async move {
                let result = dispatch::<H, P>(handler, &delivery).await;
                settle(queue.as_ref(), observer.as_ref(), &stats, &delivery, result).await;
                stats.finished();
                drop(permit);
            });
        }

        let outstanding = tasks.len();
        if outstanding > 0 {
            info!(outstanding, "waiting for in-flight handlers");
        }
        while tasks.join_next().await.is_some() {}

        let report = self.stats.report();
        info!(
            acked = report.acked,
            nacked = report.nacked,
            settle_failures = report.settle_failures,
            "consumer stopped"
        );
        outcome.map(|()| report)
    }
}

/// Decode and run the handler in its own task so a panic is a plain failure.
async fn dispatch<H, P>(handler: Arc<H>, delivery: &Delivery) -> anyhow::Result<()>
where
    H: TaskHandler<P>,
    P: DeserializeOwned + Send + 'static,
{
    let payload: P = decode(delivery.body())?;
    match tokio::spawn(async move { handler.handle(payload).await }).await {
        Ok(result) => result,
        Err(join) => Err(anyhow!("handler panicked: {join}")),
    }
}

async fn settle<Q>(
    queue: &Q,
    observer: &dyn PipelineObserver,
    stats: &ConsumerStats,
    delivery: &Delivery,
    result: anyhow::Result<()>,
) where
    Q: Queue + ?Sized,
{
    match result {
        Ok(()) => match queue.ack(delivery).await {
            Ok(()) => {
                stats.acked.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                stats.settle_failures.fetch_add(1, Ordering::SeqCst);
                warn!(tag = delivery.tag(), error = %err, "failed to ack message");
            }
        },
        Err(err) => {
            observer.on_event(&PipelineEvent::HandlerFailed {
                queue: delivery.queue().to_string(),
                tag: delivery.tag().to_string(),
                error: format!("{err:#}"),
                body: delivery.body_lossy(),
            });
            match queue.nack(delivery).await {
                Ok(()) => {
                    stats.nacked.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    stats.settle_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(tag = delivery.tag(), error = %err, "failed to nack message");
                }
            }
        }
    }
}
