//! In-memory drive store for tests/dev.
//!
//! Models the four tables the sweeper touches (`deleted_folders`,
//! `deleted_files`, `folders`, `files`). Every operation runs under one lock,
//! so each call is atomic the way a single SQL statement is.
//!
//! Removing a folder appends a `deleted_folders` row for it, standing in for
//! the database trigger that feeds the backlog in production. That is what
//! makes the cascade transitive: child folders come back through the queue.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sweeper_core::{BacklogRecord, DeletedFile, DeletedFolder, EntityId, FileStatus};

use super::{BacklogStore, DriveStore, HierarchyStore, StoreError};

#[derive(Debug, Clone)]
struct FolderRow {
    parent_id: Option<EntityId>,
    removed: bool,
    removed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct FileRow {
    folder_id: EntityId,
    status: FileStatus,
}

#[derive(Debug, Default)]
struct DriveState {
    folders: BTreeMap<EntityId, FolderRow>,
    files: BTreeMap<EntityId, FileRow>,
    deleted_folders: Vec<DeletedFolder>,
    deleted_files: Vec<DeletedFile>,
}

/// Snapshot of how often each store operation ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub fetches: u64,
    pub claims: u64,
    pub process_updates: u64,
    pub file_batches: u64,
    pub folder_batches: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    fetches: AtomicU64,
    claims: AtomicU64,
    process_updates: AtomicU64,
    file_batches: AtomicU64,
    folder_batches: AtomicU64,
}

#[derive(Debug, Default)]
pub struct InMemoryDriveStore {
    state: Mutex<DriveState>,
    calls: CallCounters,
    fail_fetches: AtomicBool,
    fail_claims: AtomicBool,
    disconnected: AtomicBool,
}

impl InMemoryDriveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, folder_id: EntityId, parent_id: Option<EntityId>) {
        self.state.lock().unwrap().folders.insert(
            folder_id,
            FolderRow {
                parent_id,
                removed: false,
                removed_at: None,
            },
        );
    }

    pub fn add_file(&self, file_id: EntityId, folder_id: EntityId) {
        self.state.lock().unwrap().files.insert(
            file_id,
            FileRow {
                folder_id,
                status: FileStatus::Exists,
            },
        );
    }

    pub fn add_deleted_folder(&self, folder_id: EntityId) {
        self.state
            .lock()
            .unwrap()
            .deleted_folders
            .push(DeletedFolder::new(folder_id, Utc::now()));
    }

    pub fn add_deleted_file(&self, file_id: EntityId, network_file_id: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .deleted_files
            .push(DeletedFile::new(file_id, network_file_id, Utc::now()));
    }

    pub fn deleted_folder(&self, folder_id: EntityId) -> Option<DeletedFolder> {
        let state = self.state.lock().unwrap();
        state.deleted_folders.iter().find(|r| r.folder_id == folder_id).cloned()
    }

    pub fn deleted_file(&self, file_id: EntityId) -> Option<DeletedFile> {
        let state = self.state.lock().unwrap();
        state.deleted_files.iter().find(|r| r.file_id == file_id).cloned()
    }

    pub fn deleted_folders(&self) -> Vec<DeletedFolder> {
        self.state.lock().unwrap().deleted_folders.clone()
    }

    pub fn deleted_files(&self) -> Vec<DeletedFile> {
        self.state.lock().unwrap().deleted_files.clone()
    }

    pub fn file_status(&self, file_id: EntityId) -> Option<FileStatus> {
        self.state.lock().unwrap().files.get(&file_id).map(|f| f.status)
    }

    pub fn folder_removed(&self, folder_id: EntityId) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(&folder_id)
            .map(|f| f.removed)
    }

    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            fetches: self.calls.fetches.load(Ordering::SeqCst),
            claims: self.calls.claims.load(Ordering::SeqCst),
            process_updates: self.calls.process_updates.load(Ordering::SeqCst),
            file_batches: self.calls.file_batches.load(Ordering::SeqCst),
            folder_batches: self.calls.folder_batches.load(Ordering::SeqCst),
        }
    }

    /// Make subsequent fetches fail (simulates a lost connection).
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent claim updates fail.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.is_disconnected() {
            return Err(StoreError::query(operation, "store is disconnected"));
        }
        Ok(())
    }

    fn before_fetch(&self) -> Result<(), StoreError> {
        self.ensure_connected("fetch_eligible")?;
        self.calls.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StoreError::query("fetch_eligible", "injected fetch failure"));
        }
        Ok(())
    }

    fn before_claim(&self) -> Result<(), StoreError> {
        self.ensure_connected("claim")?;
        self.calls.claims.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(StoreError::query("claim", "injected claim failure"));
        }
        Ok(())
    }
}

fn fetch_rows<R: BacklogRecord>(rows: &[R], limit: usize) -> Vec<R> {
    rows.iter().filter(|r| r.is_eligible()).take(limit).cloned().collect()
}

fn claim_rows<R: BacklogRecord>(rows: &mut [R], ids: &[EntityId]) -> Vec<EntityId> {
    let now = Utc::now();
    let mut won = Vec::new();
    for row in rows.iter_mut() {
        if ids.contains(&row.id()) && row.state_mut().claim(now) {
            won.push(row.id());
        }
    }
    won
}

fn process_rows<R: BacklogRecord>(rows: &mut [R], ids: &[EntityId]) -> u64 {
    let now = Utc::now();
    let mut changed = 0;
    for row in rows.iter_mut().filter(|r| ids.contains(&r.id())) {
        // Unclaimed rows are skipped, like `WHERE enqueued = true`.
        if let Ok(true) = row.state_mut().mark_processed(now) {
            changed += 1;
        }
    }
    changed
}

#[async_trait]
impl BacklogStore<DeletedFolder> for InMemoryDriveStore {
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<DeletedFolder>, StoreError> {
        self.before_fetch()?;
        Ok(fetch_rows(&self.state.lock().unwrap().deleted_folders, limit))
    }

    async fn claim(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError> {
        self.before_claim()?;
        Ok(claim_rows(&mut self.state.lock().unwrap().deleted_folders, ids))
    }

    async fn mark_processed(&self, ids: &[EntityId]) -> Result<u64, StoreError> {
        self.ensure_connected("mark_processed")?;
        self.calls.process_updates.fetch_add(1, Ordering::SeqCst);
        Ok(process_rows(&mut self.state.lock().unwrap().deleted_folders, ids))
    }
}

#[async_trait]
impl BacklogStore<DeletedFile> for InMemoryDriveStore {
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<DeletedFile>, StoreError> {
        self.before_fetch()?;
        Ok(fetch_rows(&self.state.lock().unwrap().deleted_files, limit))
    }

    async fn claim(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError> {
        self.before_claim()?;
        Ok(claim_rows(&mut self.state.lock().unwrap().deleted_files, ids))
    }

    async fn mark_processed(&self, ids: &[EntityId]) -> Result<u64, StoreError> {
        self.ensure_connected("mark_processed")?;
        self.calls.process_updates.fetch_add(1, Ordering::SeqCst);
        Ok(process_rows(&mut self.state.lock().unwrap().deleted_files, ids))
    }
}

#[async_trait]
impl HierarchyStore for InMemoryDriveStore {
    async fn mark_descendant_files_deleted_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError> {
        self.ensure_connected("mark_descendant_files_deleted")?;
        self.calls.file_batches.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        let mut affected = 0u64;
        for file in state
            .files
            .values_mut()
            .filter(|f| f.folder_id == folder_id && f.status != FileStatus::Deleted)
            .take(limit)
        {
            file.status = FileStatus::Deleted;
            affected += 1;
        }
        Ok(affected)
    }

    async fn mark_descendant_folders_removed_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError> {
        self.ensure_connected("mark_descendant_folders_removed")?;
        self.calls.folder_batches.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let removed: Vec<EntityId> = state
            .folders
            .iter_mut()
            .filter(|(_, f)| f.parent_id == Some(folder_id) && !f.removed)
            .take(limit)
            .map(|(id, f)| {
                f.removed = true;
                f.removed_at = Some(now);
                *id
            })
            .collect();

        for id in &removed {
            if !state.deleted_folders.iter().any(|r| r.folder_id == *id) {
                state.deleted_folders.push(DeletedFolder::new(*id, now));
            }
        }
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl DriveStore for InMemoryDriveStore {
    async fn disconnect(&self) -> Result<(), StoreError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_only_returns_rows_it_transitioned() {
        let store = InMemoryDriveStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        store.add_deleted_folder(a);
        store.add_deleted_folder(b);

        let first = BacklogStore::<DeletedFolder>::claim(&store, &[a]).await.unwrap();
        assert_eq!(first, vec![a]);

        let second = BacklogStore::<DeletedFolder>::claim(&store, &[a, b]).await.unwrap();
        assert_eq!(second, vec![b]);

        let eligible = BacklogStore::<DeletedFolder>::fetch_eligible(&store, 10).await.unwrap();
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn processing_skips_unclaimed_rows() {
        let store = InMemoryDriveStore::new();
        let id = EntityId::new();
        store.add_deleted_file(id, "net-1");

        let changed = BacklogStore::<DeletedFile>::mark_processed(&store, &[id]).await.unwrap();
        assert_eq!(changed, 0);
        assert!(!store.deleted_file(id).unwrap().is_processed());

        BacklogStore::<DeletedFile>::claim(&store, &[id]).await.unwrap();
        let changed = BacklogStore::<DeletedFile>::mark_processed(&store, &[id]).await.unwrap();
        assert_eq!(changed, 1);
        assert!(store.deleted_file(id).unwrap().is_processed());
    }

    #[tokio::test]
    async fn removing_a_folder_backlogs_it() {
        let store = InMemoryDriveStore::new();
        let parent = EntityId::new();
        let child = EntityId::new();
        store.add_folder(parent, None);
        store.add_folder(child, Some(parent));

        let affected = store
            .mark_descendant_folders_removed_batch(parent, 1000)
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(store.folder_removed(child), Some(true));
        assert_eq!(store.folder_removed(parent), Some(false));
        assert!(store.deleted_folder(child).unwrap().is_eligible());

        let again = store
            .mark_descendant_folders_removed_batch(parent, 1000)
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.deleted_folders().len(), 1);
    }

    #[tokio::test]
    async fn file_batches_respect_the_limit() {
        let store = InMemoryDriveStore::new();
        let folder = EntityId::new();
        store.add_folder(folder, None);
        for _ in 0..5 {
            store.add_file(EntityId::new(), folder);
        }

        assert_eq!(store.mark_descendant_files_deleted_batch(folder, 3).await.unwrap(), 3);
        assert_eq!(store.mark_descendant_files_deleted_batch(folder, 3).await.unwrap(), 2);
        assert_eq!(store.mark_descendant_files_deleted_batch(folder, 3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = InMemoryDriveStore::new();
        store.fail_fetches(true);
        let err = BacklogStore::<DeletedFolder>::fetch_eligible(&store, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query { operation: "fetch_eligible", .. }));
    }
}
