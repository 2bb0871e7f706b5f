//! Store ports over the deletion backlog and the folder/file hierarchy.
//!
//! The relational store is the only owner of persisted state. The sweeper
//! holds no cursor of its own: every poll re-derives its position from the
//! `claimed`/`processed` flags of the backlog tables.

pub mod in_memory;
pub mod postgres;

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use sweeper_core::{BacklogRecord, DeletedFile, DeletedFolder, EntityId};

pub use in_memory::InMemoryDriveStore;
pub use postgres::{PgSettings, PostgresDriveStore};

/// Default row limit of one bulk hierarchy mutation.
pub const DEFAULT_MUTATION_BATCH: usize = 1000;

/// Store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store query error in {operation}: {message}")]
    Query { operation: &'static str, message: String },

    #[error("failed to decode {operation} row: {message}")]
    Decode { operation: &'static str, message: String },
}

impl StoreError {
    pub fn query(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Query {
            operation,
            message: message.into(),
        }
    }
}

/// Claim/process access to one backlog table.
#[async_trait]
pub trait BacklogStore<R: BacklogRecord>: Send + Sync {
    /// Up to `limit` rows that are neither claimed nor processed.
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<R>, StoreError>;

    /// Claim the given rows in one all-or-nothing update.
    ///
    /// Returns the ids this call transitioned. Rows already claimed by someone
    /// else are left untouched and omitted, which is what keeps concurrent
    /// claimers from publishing the same row twice.
    async fn claim(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError>;

    /// Mark claimed rows as processed. Returns the number of rows changed.
    async fn mark_processed(&self, ids: &[EntityId]) -> Result<u64, StoreError>;
}

/// Outcome of a repeated bulk mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of update statements issued.
    pub batches: u32,
    /// Total rows affected across all batches.
    pub rows: u64,
}

/// Bounded bulk mutations over the hierarchy below one folder.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Set `status = DELETED` on at most `limit` not-yet-deleted files of the folder.
    async fn mark_descendant_files_deleted_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError>;

    /// Set `removed = true` on at most `limit` not-yet-removed child folders.
    async fn mark_descendant_folders_removed_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError>;

    async fn mark_descendant_files_deleted(
        &self,
        folder_id: EntityId,
        batch_size: usize,
    ) -> Result<BatchReport, StoreError> {
        mark_exhaustively(batch_size, |limit| {
            self.mark_descendant_files_deleted_batch(folder_id, limit)
        })
        .await
    }

    async fn mark_descendant_folders_removed(
        &self,
        folder_id: EntityId,
        batch_size: usize,
    ) -> Result<BatchReport, StoreError> {
        mark_exhaustively(batch_size, |limit| {
            self.mark_descendant_folders_removed_batch(folder_id, limit)
        })
        .await
    }
}

/// Everything the sweeper needs from the drive database, plus its lifecycle.
#[async_trait]
pub trait DriveStore:
    BacklogStore<DeletedFolder> + BacklogStore<DeletedFile> + HierarchyStore
{
    async fn disconnect(&self) -> Result<(), StoreError>;
}

/// Repeat a batch mutation until one batch affects fewer than `batch_size` rows.
pub async fn mark_exhaustively<F, Fut>(
    batch_size: usize,
    mut batch: F,
) -> Result<BatchReport, StoreError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<u64, StoreError>>,
{
    let batch_size = batch_size.max(1);
    let mut report = BatchReport::default();

    loop {
        let affected = batch(batch_size).await?;
        report.batches += 1;
        report.rows += affected;
        if affected < batch_size as u64 {
            return Ok(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn repeats_until_a_short_batch() {
        let remaining = AtomicU64::new(2500);
        let report = mark_exhaustively(1000, |limit| {
            let left = remaining.load(Ordering::SeqCst);
            let take = left.min(limit as u64);
            remaining.store(left - take, Ordering::SeqCst);
            async move { Ok(take) }
        })
        .await
        .unwrap();

        assert_eq!(report, BatchReport { batches: 3, rows: 2500 });
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_batch() {
        let remaining = AtomicU64::new(2000);
        let report = mark_exhaustively(1000, |limit| {
            let left = remaining.load(Ordering::SeqCst);
            let take = left.min(limit as u64);
            remaining.store(left - take, Ordering::SeqCst);
            async move { Ok(take) }
        })
        .await
        .unwrap();

        assert_eq!(report, BatchReport { batches: 3, rows: 2000 });
    }

    #[tokio::test]
    async fn batch_error_stops_the_loop() {
        let mut calls = 0;
        let err = mark_exhaustively(10, |_| {
            calls += 1;
            async { Err(StoreError::query("files", "boom")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, StoreError::Query { .. }));
    }
}
