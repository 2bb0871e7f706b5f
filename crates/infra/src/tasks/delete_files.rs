//! `delete-files`: delete file contents through the network gateway.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use sweeper_core::{DeletedFile, EntityId};
use sweeper_queue::{Batch, Queue};

use crate::gateway::DeletionGateway;
use crate::pipeline::{
    ClaimMode, ClaimingIterator, Consumer, ConsumerConfig, PageChunks, PipelineContext, PipelineObserver,
    Producer, ProducerConfig, TaskHandler,
};
use crate::pipeline::claiming::DEFAULT_CHUNK_SIZE;
use crate::store::BacklogStore;

pub const SOURCE_LABEL: &str = "deleted_files";

pub struct FileDeletionHandler<S: ?Sized, G: ?Sized> {
    store: Arc<S>,
    gateway: Arc<G>,
}

impl<S: ?Sized, G: ?Sized> FileDeletionHandler<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
        Self { store, gateway }
    }
}

#[async_trait]
impl<S, G> TaskHandler<Batch<DeletedFile>> for FileDeletionHandler<S, G>
where
    S: BacklogStore<DeletedFile> + ?Sized + 'static,
    G: DeletionGateway + ?Sized + 'static,
{
    async fn handle(&self, batch: Batch<DeletedFile>) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let network_ids: Vec<String> = batch.iter().map(|f| f.network_file_id.clone()).collect();
        let response = self
            .gateway
            .delete_files(&network_ids)
            .await
            .context("deleting files through the network gateway")?;

        if !response.not_confirmed().is_empty() {
            warn!(
                not_confirmed = ?response.not_confirmed(),
                "gateway did not confirm every deletion"
            );
        }

        let confirmed: HashSet<&str> = response.confirmed().iter().map(String::as_str).collect();
        let done: Vec<EntityId> = batch
            .iter()
            .filter(|f| confirmed.contains(f.network_file_id.as_str()))
            .map(|f| f.file_id)
            .collect();

        if !done.is_empty() {
            BacklogStore::<DeletedFile>::mark_processed(self.store.as_ref(), &done)
                .await
                .context("marking deleted files as processed")?;
        }

        info!(
            requested = batch.len(),
            confirmed = done.len(),
            "file batch processed"
        );
        Ok(())
    }
}

pub fn producer<S, Q>(
    ctx: &PipelineContext<S, Q>,
    queue_name: &str,
    mode: ClaimMode,
    config: ProducerConfig,
    observer: Arc<dyn PipelineObserver>,
) -> Producer<Q, PageChunks<S, DeletedFile>>
where
    S: BacklogStore<DeletedFile> + ?Sized + 'static,
    Q: Queue + ?Sized,
{
    let pages = ClaimingIterator::new(Arc::clone(&ctx.store), mode)
        .with_label(SOURCE_LABEL)
        .with_observer(Arc::clone(&observer));
    let source = PageChunks::new(pages, DEFAULT_CHUNK_SIZE);
    Producer::new(Arc::clone(&ctx.queue), queue_name, source, config).with_observer(observer)
}

pub fn consumer<S, Q, G>(
    ctx: &PipelineContext<S, Q>,
    gateway: Arc<G>,
    queue_name: &str,
    config: ConsumerConfig,
    observer: Arc<dyn PipelineObserver>,
) -> Consumer<Q, FileDeletionHandler<S, G>, Batch<DeletedFile>>
where
    S: BacklogStore<DeletedFile> + ?Sized + 'static,
    Q: Queue + ?Sized + 'static,
    G: DeletionGateway + ?Sized + 'static,
{
    let handler = FileDeletionHandler::new(Arc::clone(&ctx.store), gateway);
    Consumer::new(Arc::clone(&ctx.queue), queue_name, handler, config).with_observer(observer)
}
