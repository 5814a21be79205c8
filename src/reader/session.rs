use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::RwLock as AsyncRwLock;
use uuid::Uuid;

use super::content_service::{ChapterContentService, ContentError};
use super::pagination::{CellPaginator, PaginationCoordinator, TextPaginator};
use super::prefetch::{PrefetchDirection, PrefetchScheduler};
use super::progress::ProgressTracker;
use super::repository::{ContentRepository, FetchStrategy};
use super::session_cache::CacheStats;
use crate::domain::{ChapterMeta, Page, PagePosition, PageRange, ReadingProgress, Viewport};

/// A chapter ready to render.
#[derive(Debug, Clone)]
pub struct OpenedChapter {
    pub meta: ChapterMeta,
    pub pages: Arc<Vec<Page>>,
    /// Global page span among the chapters paginated so far.
    pub range: Option<PageRange>,
    pub is_first: bool,
    pub is_last: bool,
    pub estimated_total_pages: usize,
}

/// One reader's session on one book. Owns the session cache, the page index
/// and the prefetch tasks; all of them end with [`Self::close`].
pub struct ReaderSession {
    session_id: Uuid,
    book_id: String,
    service: Arc<ChapterContentService>,
    pagination: Arc<PaginationCoordinator>,
    prefetch: PrefetchScheduler,
    progress: Arc<ProgressTracker>,
    viewport: RwLock<Viewport>,
}

impl ReaderSession {
    pub fn new(
        book_id: impl Into<String>,
        repository: Arc<dyn ContentRepository>,
        progress: Arc<ProgressTracker>,
        cache_capacity: usize,
        strategy: FetchStrategy,
        viewport: Viewport,
    ) -> Self {
        let paginator: Arc<dyn TextPaginator> = Arc::new(CellPaginator);
        let service = Arc::new(
            ChapterContentService::new(repository, Arc::clone(&paginator), cache_capacity)
                .with_strategy(strategy),
        );
        let pagination = Arc::new(PaginationCoordinator::new(paginator));
        pagination.set_layout(pagination.layout(&viewport));
        Self {
            session_id: Uuid::now_v7(),
            book_id: book_id.into(),
            prefetch: PrefetchScheduler::new(Arc::clone(&service), Arc::clone(&pagination)),
            service,
            pagination,
            progress,
            viewport: RwLock::new(viewport),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn chapters(&self) -> Vec<ChapterMeta> {
        self.service.chapter_list()
    }

    /// Loads the chapter list and installs it as the page index order.
    #[tracing::instrument(level = "debug", skip(self), fields(session_id = %self.session_id, book_id = %self.book_id))]
    pub async fn open(&self) -> Vec<ChapterMeta> {
        let chapters = self.service.get_chapter_list(&self.book_id).await;
        if !chapters.is_empty() {
            self.pagination
                .set_chapter_order(chapters.iter().map(|c| c.id.clone()).collect());
        }
        tracing::info!(chapters = chapters.len(), "reader session opened");
        chapters
    }

    /// Fetches, paginates and indexes a chapter, then warms its neighbors.
    #[tracing::instrument(level = "debug", skip(self), fields(session_id = %self.session_id))]
    pub async fn open_chapter(&self, chapter_id: &str) -> Result<OpenedChapter, ContentError> {
        let viewport = self.viewport();
        let chapter = self.service.get_content(chapter_id).await?;
        let chapter = self.service.ensure_pages(chapter, &viewport).await;
        let range = self
            .pagination
            .record_pages(&chapter.meta.id, chapter.pages.len(), chapter.layout);

        let chapters = self.service.chapter_list();
        let position = chapters.iter().position(|c| c.id == chapter.meta.id);
        let is_first = position == Some(0);
        let is_last = position.is_some() && position == chapters.len().checked_sub(1);

        self.prefetch.schedule(
            PrefetchDirection::Both,
            &chapters,
            &chapter.meta.id,
            Some(viewport),
        );

        Ok(OpenedChapter {
            range,
            is_first,
            is_last,
            estimated_total_pages: self.pagination.estimated_total_pages(),
            meta: chapter.meta,
            pages: chapter.pages,
        })
    }

    /// Records the page the reader is on. A page index past the end of a
    /// paginated chapter is clamped to its last page.
    #[tracing::instrument(level = "debug", skip(self), fields(session_id = %self.session_id))]
    pub async fn commit_position(
        &self,
        chapter_id: &str,
        position: PagePosition,
    ) -> anyhow::Result<ReadingProgress> {
        let pages = self.service.peek_cached(chapter_id).map(|c| c.pages);
        let position = match (position, pages.as_deref()) {
            (PagePosition::Page(index), Some(pages)) if !pages.is_empty() => {
                PagePosition::Page(index.min(pages.len() - 1))
            }
            (position, _) => position,
        };
        let location = self.pagination.locate(chapter_id);
        self.progress
            .compute_and_save(
                &self.book_id,
                chapter_id,
                position,
                Some(&location),
                pages.as_deref().map(Vec::as_slice),
            )
            .await
    }

    pub async fn resume(&self) -> anyhow::Result<Option<ReadingProgress>> {
        self.progress.load(&self.book_id).await
    }

    /// Switches to a new viewport. When the text grid changes, running
    /// prefetches are cancelled and the page index starts over; cached
    /// chapters are re-paginated the next time they are opened.
    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        {
            let mut current = self.viewport.write().unwrap_or_else(PoisonError::into_inner);
            if *current == viewport {
                return false;
            }
            *current = viewport;
        }
        let layout = self.pagination.layout(&viewport);
        if self.pagination.set_layout(layout) {
            self.prefetch.cancel_all();
            tracing::debug!(session_id = %self.session_id, ?layout, "viewport changed, page index reset");
        }
        true
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.service.cache_stats()
    }

    pub fn estimated_total_pages(&self) -> usize {
        self.pagination.estimated_total_pages()
    }

    pub fn page_ranges(&self) -> Vec<PageRange> {
        self.pagination.ranges()
    }

    pub async fn wait_for_prefetch(&self) {
        self.prefetch.wait_idle().await;
    }

    /// Ends the session: prefetches are aborted and cached chapters dropped.
    pub fn close(&self) {
        let cancelled = self.prefetch.cancel_all();
        let stats = self.service.cache_stats();
        self.service.clear_session();
        self.pagination.reset_counts();
        tracing::info!(
            session_id = %self.session_id,
            book_id = %self.book_id,
            cancelled,
            hits = stats.hits,
            misses = stats.misses,
            "reader session closed"
        );
    }
}

/// Open reader sessions, one per book.
pub struct ReaderLibrary {
    repository: Arc<dyn ContentRepository>,
    progress: Arc<ProgressTracker>,
    cache_capacity: usize,
    strategy: FetchStrategy,
    sessions: AsyncRwLock<HashMap<String, Arc<ReaderSession>>>,
}

impl ReaderLibrary {
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        progress: Arc<ProgressTracker>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            repository,
            progress,
            cache_capacity,
            strategy: FetchStrategy::CacheFirst,
            sessions: AsyncRwLock::new(HashMap::new()),
        }
    }

    /// Tier ordering for sessions opened from now on.
    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns the book's session, opening one when needed. An existing
    /// session reloads its chapter list.
    pub async fn open(&self, book_id: &str) -> Arc<ReaderSession> {
        if let Some(existing) = self.get(book_id).await {
            existing.open().await;
            return existing;
        }

        let session = Arc::new(ReaderSession::new(
            book_id,
            Arc::clone(&self.repository),
            Arc::clone(&self.progress),
            self.cache_capacity,
            self.strategy,
            Viewport::default(),
        ));
        session.open().await;
        Arc::clone(
            self.sessions
                .write()
                .await
                .entry(book_id.to_string())
                .or_insert(session),
        )
    }

    pub async fn get(&self, book_id: &str) -> Option<Arc<ReaderSession>> {
        self.sessions.read().await.get(book_id).cloned()
    }

    /// Closes and forgets the book's session. Returns `false` when none was open.
    pub async fn close(&self, book_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(book_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Saved progress, whether or not a session is open.
    pub async fn load_progress(&self, book_id: &str) -> anyhow::Result<Option<ReadingProgress>> {
        self.progress.load(book_id).await
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::repository::TieredRepository;
    use crate::reader::repository::tests::FakeRemote;
    use crate::storage::{DiskCache, MemoryProgressStore};

    fn repository(remote: Arc<FakeRemote>, dir: &tempfile::TempDir) -> Arc<dyn ContentRepository> {
        Arc::new(TieredRepository::new(
            remote,
            DiskCache::new(dir.path()),
            chrono::Duration::hours(1),
        ))
    }

    fn session(remote: Arc<FakeRemote>, dir: &tempfile::TempDir) -> ReaderSession {
        ReaderSession::new(
            "book-1",
            repository(remote, dir),
            Arc::new(ProgressTracker::new(Arc::new(MemoryProgressStore::new()))),
            12,
            FetchStrategy::CacheFirst,
            Viewport::default(),
        )
    }

    #[tokio::test]
    async fn opening_first_chapter_indexes_and_prefetches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2", "ch-3"]));
        let session = session(Arc::clone(&remote), &dir);
        assert_eq!(session.open().await.len(), 3);

        let opened = session.open_chapter("ch-1").await?;
        assert!(opened.is_first);
        assert!(!opened.is_last);
        assert_eq!(opened.pages.len(), 1);
        assert_eq!(opened.range.unwrap().start_global_index, 0);

        session.wait_for_prefetch().await;
        assert_eq!(session.page_ranges().len(), 2);
        assert_eq!(session.estimated_total_pages(), 3);
        assert_eq!(remote.content_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn mid_book_open_gets_a_range() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2", "ch-3", "ch-4"]));
        let session = session(remote, &dir);
        session.open().await;

        let opened = session.open_chapter("ch-3").await?;
        assert_eq!(opened.range.map(|r| r.start_global_index), Some(0));

        // The previous chapter lands before it and pushes it back by one page.
        session.wait_for_prefetch().await;
        let reopened = session.open_chapter("ch-3").await?;
        assert_eq!(reopened.range.map(|r| r.start_global_index), Some(1));

        let progress = session.commit_position("ch-3", PagePosition::Page(0)).await?;
        assert_eq!(progress.global_page_index, 1);
        Ok(())
    }

    #[tokio::test]
    async fn boundary_flags_follow_chapter_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2"]));
        let session = session(remote, &dir);
        session.open().await;

        let last = session.open_chapter("ch-2").await?;
        assert!(last.is_last);
        assert!(!last.is_first);
        assert!(matches!(
            session.open_chapter("nope").await,
            Err(ContentError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn committed_position_is_resumed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2"]));
        let session = session(remote, &dir);
        session.open().await;
        session.open_chapter("ch-1").await?;

        let detail = session
            .commit_position("ch-1", PagePosition::DetailPage)
            .await?;
        assert_eq!(detail.chapter_progress, 0.0);

        let saved = session
            .commit_position("ch-1", PagePosition::Page(7))
            .await?;
        assert_eq!(saved.position, PagePosition::Page(0));
        assert_eq!(saved.chapter_progress, 1.0);
        assert_eq!(session.resume().await?, Some(saved));
        Ok(())
    }

    #[tokio::test]
    async fn viewport_change_repaginates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote
            .bodies
            .lock()
            .unwrap()
            .insert("ch-1".into(), "A sentence that keeps going. ".repeat(400));
        let session = session(remote, &dir);
        session.open().await;
        let before = session.open_chapter("ch-1").await?;

        assert!(!session.set_viewport(Viewport::default()));
        assert!(session.set_viewport(Viewport {
            font_size_pt: 36.0,
            ..Viewport::default()
        }));
        assert!(session.page_ranges().is_empty());

        let after = session.open_chapter("ch-1").await?;
        assert!(after.pages.len() > before.pages.len());
        assert_eq!(after.range.unwrap().page_count(), after.pages.len());
        Ok(())
    }

    #[tokio::test]
    async fn close_clears_the_session_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2"]));
        let session = session(remote, &dir);
        session.open().await;
        session.open_chapter("ch-1").await?;

        session.close();
        assert_eq!(session.cache_stats().size, 0);
        assert!(session.chapters().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn library_keeps_one_session_per_book() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let library = ReaderLibrary::new(
            repository(remote, &dir),
            Arc::new(ProgressTracker::new(Arc::new(MemoryProgressStore::new()))),
            4,
        );

        let first = library.open("book-1").await;
        let second = library.open("book-1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.chapters().len(), 1);
        assert_eq!(library.open_sessions().await, 1);

        assert!(library.close("book-1").await);
        assert!(!library.close("book-1").await);
        assert!(library.get("book-1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn network_first_library_refreshes_chapter_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let library = ReaderLibrary::new(
            repository(Arc::clone(&remote), &dir),
            Arc::new(ProgressTracker::new(Arc::new(MemoryProgressStore::new()))),
            4,
        )
        .with_strategy(FetchStrategy::NetworkFirst);

        library.open("book-1").await;
        library.open("book-1").await;
        assert_eq!(remote.list_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        remote.list_fails.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(library.open("book-1").await.chapters().len(), 1);
        Ok(())
    }
}
