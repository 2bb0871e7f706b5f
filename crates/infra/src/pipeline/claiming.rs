//! Claiming iterator over a backlog table.
//!
//! Each poll fetches one page of eligible rows and claims the whole page in a
//! single update before anything from it is yielded. Only rows the update
//! actually transitioned are yielded, so two iterators racing on the same
//! table never hand out the same row.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sweeper_core::{BacklogRecord, EntityId};
use sweeper_queue::Batch;

use super::PipelineError;
use super::events::{PipelineEvent, PipelineObserver, TracingObserver};
use crate::store::BacklogStore;

/// Rows fetched per poll.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Rows per published batch for batch-shaped tasks.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// What to do when a poll finds no eligible rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Sleep for the interval and poll again, until cancelled.
    Poll(Duration),
    /// End the sequence.
    DrainToEmpty,
}

impl Default for ClaimMode {
    fn default() -> Self {
        Self::Poll(Duration::from_secs(1))
    }
}

/// A lazy, cancellable sequence of publishable items.
#[async_trait]
pub trait ItemSource: Send {
    type Item: Serialize + Send + Sync + 'static;

    /// Next item, or `None` once the sequence ended or `cancel` fired.
    async fn next_item(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Item>, PipelineError>;

    /// Items already claimed but not yet handed out. Never touches the store.
    fn take_claimed(&mut self) -> Vec<Self::Item> {
        Vec::new()
    }
}

pub struct ClaimingIterator<S: ?Sized, R> {
    store: Arc<S>,
    mode: ClaimMode,
    page_size: usize,
    label: &'static str,
    buffer: VecDeque<R>,
    observer: Arc<dyn PipelineObserver>,
    _record: PhantomData<fn() -> R>,
}

impl<S, R> ClaimingIterator<S, R>
where
    S: BacklogStore<R> + ?Sized,
    R: BacklogRecord,
{
    pub fn new(store: Arc<S>, mode: ClaimMode) -> Self {
        Self {
            store,
            mode,
            page_size: DEFAULT_PAGE_SIZE,
            label: "backlog",
            buffer: VecDeque::new(),
            observer: Arc::new(TracingObserver),
            _record: PhantomData,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Name reported in `BacklogIdle` events.
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn mode(&self) -> ClaimMode {
        self.mode
    }

    /// Fetch and claim the next non-empty page.
    ///
    /// Returns `None` when the backlog is drained (`DrainToEmpty`) or when
    /// `cancel` fires during the idle backoff. Store errors are returned as-is;
    /// the iterator does not retry.
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<R>>, PipelineError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let page = self.store.fetch_eligible(self.page_size).await?;
            if page.is_empty() {
                match self.mode {
                    ClaimMode::DrainToEmpty => return Ok(None),
                    ClaimMode::Poll(interval) => {
                        self.observer.on_event(&PipelineEvent::BacklogIdle { source: self.label });
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(None),
                            _ = tokio::time::sleep(interval) => continue,
                        }
                    }
                }
            }

            let ids: Vec<EntityId> = page.iter().map(|r| r.id()).collect();
            let won = self.store.claim(&ids).await?;
            let claimed: Vec<R> = page.into_iter().filter(|r| won.contains(&r.id())).collect();

            if claimed.len() < ids.len() {
                debug!(
                    source = self.label,
                    fetched = ids.len(),
                    claimed = claimed.len(),
                    "rows claimed concurrently by another producer"
                );
            }
            if !claimed.is_empty() {
                return Ok(Some(claimed));
            }
        }
    }
}

#[async_trait]
impl<S, R> ItemSource for ClaimingIterator<S, R>
where
    S: BacklogStore<R> + ?Sized + 'static,
    R: BacklogRecord + Serialize,
{
    type Item = R;

    async fn next_item(&mut self, cancel: &CancellationToken) -> Result<Option<R>, PipelineError> {
        if self.buffer.is_empty() {
            match self.next_page(cancel).await? {
                Some(page) => self.buffer.extend(page),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }

    fn take_claimed(&mut self) -> Vec<R> {
        self.buffer.drain(..).collect()
    }
}

/// Groups each claimed page into batches of at most `chunk_size` rows.
///
/// A batch never mixes rows of two pages: the tail of a page goes out as a
/// short batch before the next page is fetched.
pub struct PageChunks<S: ?Sized, R> {
    inner: ClaimingIterator<S, R>,
    chunk_size: usize,
    pending: VecDeque<Vec<R>>,
}

impl<S, R> PageChunks<S, R>
where
    S: BacklogStore<R> + ?Sized,
    R: BacklogRecord,
{
    pub fn new(inner: ClaimingIterator<S, R>, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl<S, R> ItemSource for PageChunks<S, R>
where
    S: BacklogStore<R> + ?Sized + 'static,
    R: BacklogRecord + Serialize,
{
    type Item = Batch<R>;

    async fn next_item(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Batch<R>>, PipelineError> {
        if self.pending.is_empty() {
            match self.inner.next_page(cancel).await? {
                Some(page) => self.pending.extend(chunk_page(page, self.chunk_size)),
                None => return Ok(None),
            }
        }
        Ok(self.pending.pop_front().map(Batch::new))
    }

    fn take_claimed(&mut self) -> Vec<Batch<R>> {
        self.pending.drain(..).map(Batch::new).collect()
    }
}

/// Split one page into consecutive chunks of at most `size` rows.
pub fn chunk_page<T>(page: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(page.len().div_ceil(size));
    let mut rest = page.into_iter().peekable();
    while rest.peek().is_some() {
        chunks.push(rest.by_ref().take(size).collect());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDriveStore;
    use proptest::prelude::*;
    use crate::pipeline::RecordingObserver;
    use sweeper_core::{DeletedFile, DeletedFolder};

    fn seeded(n: usize) -> Arc<InMemoryDriveStore> {
        let store = Arc::new(InMemoryDriveStore::new());
        for _ in 0..n {
            store.add_deleted_folder(EntityId::new());
        }
        store
    }

    #[tokio::test]
    async fn drain_mode_yields_every_row_once_then_ends() {
        let store = seeded(250);
        let mut iter: ClaimingIterator<_, DeletedFolder> =
            ClaimingIterator::new(store.clone(), ClaimMode::DrainToEmpty);
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        while let Some(row) = iter.next_item(&cancel).await.unwrap() {
            seen.push(row.folder_id);
        }

        assert_eq!(seen.len(), 250);
        assert!(store.deleted_folders().iter().all(|r| r.is_claimed()));
        // three pages plus the empty one that ends the sequence
        assert_eq!(store.calls().fetches, 4);
        assert_eq!(store.calls().claims, 3);
    }

    #[tokio::test]
    async fn page_is_claimed_before_its_first_row_is_yielded() {
        let store = seeded(5);
        let mut iter: ClaimingIterator<_, DeletedFolder> =
            ClaimingIterator::new(store.clone(), ClaimMode::DrainToEmpty);

        let first = iter.next_item(&CancellationToken::new()).await.unwrap().unwrap();
        assert!(store.deleted_folder(first.folder_id).unwrap().is_claimed());
        assert_eq!(
            store.deleted_folders().iter().filter(|r| r.is_claimed()).count(),
            5
        );
    }

    #[tokio::test]
    async fn poll_mode_stops_on_cancel_during_backoff() {
        let store = seeded(0);
        let observer = Arc::new(RecordingObserver::new());
        let mut iter: ClaimingIterator<_, DeletedFolder> =
            ClaimingIterator::new(store, ClaimMode::Poll(Duration::from_secs(3600)))
                .with_observer(observer.clone());
        let cancel = CancellationToken::new();

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        });

        let next = tokio::time::timeout(Duration::from_secs(5), iter.next_item(&cancel))
            .await
            .expect("backoff should be interrupted")
            .unwrap();
        assert!(next.is_none());
        assert_eq!(
            observer.events(),
            vec![PipelineEvent::BacklogIdle { source: "backlog" }]
        );
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let store = seeded(3);
        store.fail_fetches(true);
        let mut iter: ClaimingIterator<_, DeletedFolder> =
            ClaimingIterator::new(store, ClaimMode::DrainToEmpty);

        let err = iter.next_item(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
    }

    #[tokio::test]
    async fn failed_claim_leaves_the_page_unclaimed() {
        let store = seeded(3);
        store.fail_claims(true);
        let mut iter: ClaimingIterator<_, DeletedFolder> =
            ClaimingIterator::new(store.clone(), ClaimMode::DrainToEmpty);

        assert!(iter.next_item(&CancellationToken::new()).await.is_err());
        assert!(store.deleted_folders().iter().all(|r| r.is_eligible()));
    }

    #[tokio::test]
    async fn chunks_do_not_cross_pages() {
        let store = Arc::new(InMemoryDriveStore::new());
        for i in 0..25 {
            store.add_deleted_file(EntityId::new(), format!("net-{i}"));
        }
        let iter: ClaimingIterator<_, DeletedFile> =
            ClaimingIterator::new(store, ClaimMode::DrainToEmpty).with_page_size(12);
        let mut chunks = PageChunks::new(iter, 10);
        let cancel = CancellationToken::new();

        let mut sizes = Vec::new();
        while let Some(batch) = chunks.next_item(&cancel).await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![10, 2, 10, 2, 1]);
    }

    #[tokio::test]
    async fn take_claimed_hands_back_the_rest_of_the_page_without_fetching() {
        let store = Arc::new(InMemoryDriveStore::new());
        for i in 0..25 {
            store.add_deleted_file(EntityId::new(), format!("net-{i}"));
        }
        let iter: ClaimingIterator<_, DeletedFile> =
            ClaimingIterator::new(store.clone(), ClaimMode::DrainToEmpty).with_page_size(25);
        let mut chunks = PageChunks::new(iter, 10);
        let cancel = CancellationToken::new();

        assert_eq!(chunks.next_item(&cancel).await.unwrap().unwrap().len(), 10);
        let rest: Vec<usize> = chunks.take_claimed().iter().map(|b| b.len()).collect();

        assert_eq!(rest, vec![10, 5]);
        assert!(chunks.take_claimed().is_empty());
        assert_eq!(store.calls().fetches, 1);
    }

    proptest! {
        #[test]
        fn chunking_preserves_order_and_bounds(len in 0usize..300, size in 1usize..40) {
            let page: Vec<usize> = (0..len).collect();
            let chunks = chunk_page(page.clone(), size);

            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
            prop_assert!(chunks.iter().rev().skip(1).all(|c| c.len() == size));
            prop_assert_eq!(chunks.concat(), page);
        }
    }
}
