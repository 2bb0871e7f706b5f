//! `delete-folders`: cascade a deleted folder to its direct children.
//!
//! Child folders marked removed land in the backlog themselves, so deeper
//! levels are reached through later messages rather than recursion here.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use sweeper_core::DeletedFolder;
use sweeper_queue::Queue;

use crate::pipeline::{
    ClaimMode, ClaimingIterator, Consumer, ConsumerConfig, PipelineContext, PipelineObserver, Producer,
    ProducerConfig, TaskHandler,
};
use crate::store::{BacklogStore, DEFAULT_MUTATION_BATCH, HierarchyStore};

pub const SOURCE_LABEL: &str = "deleted_folders";

pub struct FolderDeletionHandler<S: ?Sized> {
    store: Arc<S>,
    batch_size: usize,
}

impl<S: ?Sized> FolderDeletionHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_MUTATION_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[async_trait]
impl<S> TaskHandler<DeletedFolder> for FolderDeletionHandler<S>
where
    S: BacklogStore<DeletedFolder> + HierarchyStore + ?Sized + 'static,
{
    async fn handle(&self, folder: DeletedFolder) -> anyhow::Result<()> {
        let folder_id = folder.folder_id;

        let files = self
            .store
            .mark_descendant_files_deleted(folder_id, self.batch_size)
            .await
            .with_context(|| format!("marking files of folder {folder_id} as deleted"))?;

        let folders = self
            .store
            .mark_descendant_folders_removed(folder_id, self.batch_size)
            .await
            .with_context(|| format!("marking child folders of {folder_id} as removed"))?;

        let processed = BacklogStore::<DeletedFolder>::mark_processed(self.store.as_ref(), &[folder_id])
            .await
            .with_context(|| format!("marking deleted folder {folder_id} as processed"))?;
        if processed == 0 {
            warn!(%folder_id, "backlog row was not in the claimed state");
        }

        info!(
            %folder_id,
            files = files.rows,
            file_batches = files.batches,
            folders = folders.rows,
            folder_batches = folders.batches,
            "folder processed"
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
) -> Producer<Q, ClaimingIterator<S, DeletedFolder>>
where
    S: BacklogStore<DeletedFolder> + ?Sized + 'static,
    Q: Queue + ?Sized,
{
    let source = ClaimingIterator::new(Arc::clone(&ctx.store), mode)
        .with_label(SOURCE_LABEL)
        .with_observer(Arc::clone(&observer));
    Producer::new(Arc::clone(&ctx.queue), queue_name, source, config).with_observer(observer)
}

pub fn consumer<S, Q>(
    ctx: &PipelineContext<S, Q>,
    queue_name: &str,
    config: ConsumerConfig,
    observer: Arc<dyn PipelineObserver>,
) -> Consumer<Q, FolderDeletionHandler<S>, DeletedFolder>
where
    S: BacklogStore<DeletedFolder> + HierarchyStore + ?Sized + 'static,
    Q: Queue + ?Sized + 'static,
{
    let handler = FolderDeletionHandler::new(Arc::clone(&ctx.store));
    Consumer::new(Arc::clone(&ctx.queue), queue_name, handler, config).with_observer(observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DriveStore, InMemoryDriveStore};
    use sweeper_core::{BacklogRecord, EntityId, FileStatus};

    #[tokio::test]
    async fn cascades_then_marks_processed() {
        let store = Arc::new(InMemoryDriveStore::new());
        let folder = EntityId::new();
        let child = EntityId::new();
        let file = EntityId::new();
        store.add_folder(folder, None);
        store.add_folder(child, Some(folder));
        store.add_file(file, folder);
        store.add_deleted_folder(folder);
        BacklogStore::<DeletedFolder>::claim(store.as_ref(), &[folder]).await.unwrap();

        let row = store.deleted_folder(folder).unwrap();
        FolderDeletionHandler::new(store.clone()).handle(row).await.unwrap();

        assert_eq!(store.file_status(file), Some(FileStatus::Deleted));
        assert_eq!(store.folder_removed(child), Some(true));
        assert!(store.deleted_folder(folder).unwrap().is_processed());
        // the removed child is now waiting in the backlog
        assert!(store.deleted_folder(child).unwrap().is_eligible());
    }

    #[tokio::test]
    async fn store_failure_leaves_the_row_unprocessed() {
        let store = Arc::new(InMemoryDriveStore::new());
        let folder = EntityId::new();
        store.add_deleted_folder(folder);
        BacklogStore::<DeletedFolder>::claim(store.as_ref(), &[folder]).await.unwrap();
        store.disconnect().await.unwrap();

        let row = store.deleted_folder(folder).unwrap();
        let err = FolderDeletionHandler::new(store.clone()).handle(row).await.unwrap_err();

        assert!(format!("{err:#}").contains("marking files of folder"));
        assert!(!store.deleted_folder(folder).unwrap().is_processed());
    }
}
