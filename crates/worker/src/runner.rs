//! Runs one role of one task over an already-connected context.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sweeper_infra::gateway::{DeletionGateway, HttpDeletionGateway, TokenSigner};
use sweeper_infra::pipeline::{
    ClaimMode, ConsumerConfig, ConsumerReport, PipelineContext, PipelineObserver, ProducerConfig,
    ProducerReport, TracingObserver,
};
use sweeper_infra::store::DriveStore;
use sweeper_infra::tasks::{delete_files, delete_folders};
use sweeper_infra::TaskKind;
use sweeper_queue::Queue;

use crate::config::{GatewaySettings, RoleSettings, WorkerConfig};

/// Backoff between polls of an empty backlog.
pub const BACKLOG_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleReport {
    Producer(ProducerReport),
    Consumer(ConsumerReport),
}

pub fn claim_mode(drain: bool) -> ClaimMode {
    if drain {
        ClaimMode::DrainToEmpty
    } else {
        ClaimMode::Poll(BACKLOG_POLL_INTERVAL)
    }
}

pub fn build_gateway(settings: &GatewaySettings) -> anyhow::Result<Arc<dyn DeletionGateway>> {
    let signer = TokenSigner::from_base64_pem(&settings.secret)
        .with_context(|| format!("invalid {}", crate::config::GATEWAY_SECRET))?;
    Ok(Arc::new(HttpDeletionGateway::new(settings.endpoint.clone(), signer)))
}

pub struct RoleRunner {
    config: WorkerConfig,
    mode: ClaimMode,
    gateway: Option<Arc<dyn DeletionGateway>>,
    observer: Arc<dyn PipelineObserver>,
}

impl RoleRunner {
    pub fn new(config: WorkerConfig, mode: ClaimMode) -> Self {
        Self {
            config,
            mode,
            gateway: None,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn DeletionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run until the role finishes or `cancel` fires.
    pub async fn run<S, Q>(
        self,
        ctx: PipelineContext<S, Q>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RoleReport>
    where
        S: DriveStore + ?Sized + 'static,
        Q: Queue + ?Sized + 'static,
    {
        let queue_name = self.config.queue_name.as_str();
        info!(
            task = %self.config.task,
            queue = queue_name,
            role = ?self.config.role,
            mode = ?self.mode,
            "starting"
        );

        let report = match (self.config.task, &self.config.role) {
            (TaskKind::DeleteFolders, RoleSettings::Producer { max_queue_size }) => {
                let config = producer_config(*max_queue_size);
                let report = delete_folders::producer(&ctx, queue_name, self.mode, config, self.observer)
                    .run(cancel)
                    .await?;
                RoleReport::Producer(report)
            }
            (TaskKind::DeleteFiles, RoleSettings::Producer { max_queue_size }) => {
                let config = producer_config(*max_queue_size);
                let report = delete_files::producer(&ctx, queue_name, self.mode, config, self.observer)
                    .run(cancel)
                    .await?;
                RoleReport::Producer(report)
            }
            (TaskKind::DeleteFolders, RoleSettings::Consumer { max_concurrent, .. }) => {
                let config = consumer_config(*max_concurrent);
                let report = delete_folders::consumer(&ctx, queue_name, config, self.observer)
                    .run(cancel)
                    .await?;
                RoleReport::Consumer(report)
            }
            (TaskKind::DeleteFiles, RoleSettings::Consumer { max_concurrent, .. }) => {
                let gateway = self
                    .gateway
                    .context("the delete-files consumer needs a deletion gateway")?;
                let config = consumer_config(*max_concurrent);
                let report = delete_files::consumer(&ctx, gateway, queue_name, config, self.observer)
                    .run(cancel)
                    .await?;
                RoleReport::Consumer(report)
            }
        };
        Ok(report)
    }
}

fn producer_config(max_queue_size: u64) -> ProducerConfig {
    ProducerConfig {
        max_queue_size,
        ..ProducerConfig::default()
    }
}

fn consumer_config(max_concurrent: usize) -> ConsumerConfig {
    ConsumerConfig {
        max_concurrent,
        ..ConsumerConfig::default()
    }
}
