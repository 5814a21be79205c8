use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;

use super::pagination::{TextPaginator, paginate_with};
use super::repository::{ContentRepository, FetchStrategy};
use super::session_cache::{CacheStats, SessionCache};
use crate::domain::mapping::{merge_meta, normalize_content};
use crate::domain::{CachedChapter, ChapterMeta, Page, PageLayout, Viewport};

/// Why a chapter could not be handed to the reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// Caller error: the id can never name a chapter.
    #[error("malformed chapter id {0:?}")]
    MalformedId(String),
    /// The chapter does not exist; retrying will not help.
    #[error("chapter {0} does not exist")]
    NotFound(String),
    /// Every tier failed; a retry may succeed.
    #[error("chapter content unavailable: {0}")]
    Unavailable(String),
}

/// Session cache in front of the tiered repository, for one book.
///
/// Cache population happens before `get_content` returns, so an immediate
/// `get_cached` sees the chapter. Concurrent fetches of the same chapter share
/// a single repository call.
pub struct ChapterContentService {
    repository: Arc<dyn ContentRepository>,
    paginator: Arc<dyn TextPaginator>,
    cache: SessionCache<String, CachedChapter>,
    chapters: RwLock<Vec<ChapterMeta>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Bumped by [`ChapterContentService::clear_session`].
    generation: AtomicU64,
    strategy: FetchStrategy,
}

fn validate_id(chapter_id: &str) -> Result<&str, ContentError> {
    let trimmed = chapter_id.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
        return Err(ContentError::MalformedId(chapter_id.to_string()));
    }
    Ok(trimmed)
}

impl ChapterContentService {
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        paginator: Arc<dyn TextPaginator>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            repository,
            paginator,
            cache: SessionCache::new(cache_capacity),
            chapters: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            strategy: FetchStrategy::CacheFirst,
        }
    }

    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Ordered chapter list of the book. Transport failures are logged and give
    /// an empty list; the last good list stays known to the service.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_chapter_list(&self, book_id: &str) -> Vec<ChapterMeta> {
        match self.repository.get_chapter_list(book_id, self.strategy).await {
            Ok(chapters) => {
                if !chapters.is_empty() {
                    *self.chapters.write().unwrap_or_else(PoisonError::into_inner) =
                        chapters.clone();
                }
                chapters
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "failed to load chapter list");
                Vec::new()
            }
        }
    }

    /// Last chapter list loaded by [`Self::get_chapter_list`].
    pub fn chapter_list(&self) -> Vec<ChapterMeta> {
        self.chapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn position_of(&self, chapter_id: &str) -> Option<usize> {
        self.chapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|c| c.id == chapter_id)
    }

    fn listed(&self, chapter_id: &str) -> Option<ChapterMeta> {
        self.chapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.id == chapter_id)
            .cloned()
    }

    /// Only a known, non-empty list can rule a chapter out.
    fn is_unlisted(&self, chapter_id: &str) -> bool {
        let chapters = self.chapters.read().unwrap_or_else(PoisonError::into_inner);
        !chapters.is_empty() && !chapters.iter().any(|c| c.id == chapter_id)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_content(&self, chapter_id: &str) -> Result<CachedChapter, ContentError> {
        let chapter_id = validate_id(chapter_id)?;
        if let Some(hit) = self.cache.get(chapter_id) {
            tracing::debug!("session cache hit");
            return Ok(hit);
        }
        let result = if self.is_unlisted(chapter_id) {
            Err(ContentError::NotFound(chapter_id.to_string()))
        } else {
            self.fetch_shared(chapter_id).await
        };
        if let Err(e) = &result {
            tracing::warn!(reason = %e, "chapter content not available");
        }
        result
    }

    /// Pure cache lookup. Counts toward hit statistics and refreshes recency.
    pub fn get_cached(&self, chapter_id: &str) -> Option<CachedChapter> {
        self.cache.get(chapter_id)
    }

    /// Cache lookup that leaves statistics and recency alone.
    pub fn peek_cached(&self, chapter_id: &str) -> Option<CachedChapter> {
        self.cache.peek(chapter_id)
    }

    pub fn is_cached(&self, chapter_id: &str) -> bool {
        self.cache.contains(chapter_id)
    }

    /// Replaces the pages of a cached chapter. Returns `false` when the
    /// chapter is no longer cached.
    pub fn set_cached_pages(
        &self,
        chapter_id: &str,
        pages: impl Into<Arc<Vec<Page>>>,
        layout: Option<PageLayout>,
    ) -> bool {
        let pages = pages.into();
        self.cache.update(chapter_id, |entry| {
            entry.pages = pages;
            entry.layout = layout;
        })
    }

    /// Warms the cache for `chapter_id`, paginating for `viewport` when one is
    /// given. Failures are logged and absorbed; the chapter is returned when it
    /// ended up cached.
    #[tracing::instrument(level = "debug", skip(self, viewport))]
    pub async fn preload(
        &self,
        chapter_id: &str,
        viewport: Option<&Viewport>,
    ) -> Option<CachedChapter> {
        let chapter_id = match validate_id(chapter_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(reason = %e, "preload skipped");
                return None;
            }
        };

        let chapter = match self.cache.peek(chapter_id) {
            Some(cached) => {
                let layout = viewport.and_then(|v| self.paginator.layout(v));
                if viewport.is_none() || cached.is_paginated_for(layout) {
                    return Some(cached);
                }
                cached
            }
            None => match self.fetch_shared(chapter_id).await {
                Ok(chapter) => chapter,
                Err(e) => {
                    tracing::warn!(reason = %e, "preload failed");
                    return None;
                }
            },
        };

        match viewport {
            Some(viewport) => Some(self.ensure_pages(chapter, viewport).await),
            None => Some(chapter),
        }
    }

    /// Returns `chapter` paginated for `viewport`, splitting on the blocking
    /// pool when its pages were made for another layout.
    pub async fn ensure_pages(&self, chapter: CachedChapter, viewport: &Viewport) -> CachedChapter {
        if chapter.is_paginated_for(self.paginator.layout(viewport)) {
            return chapter;
        }

        let paginator = Arc::clone(&self.paginator);
        let content = Arc::clone(&chapter.raw_content);
        let viewport = *viewport;
        let split = tokio::task::spawn_blocking(move || {
            paginate_with(paginator.as_ref(), &content, &viewport)
        })
        .await;
        let (pages, layout) = match split {
            Ok(split) => split,
            Err(e) => {
                tracing::warn!(chapter_id = %chapter.meta.id, error = %e, "pagination task failed");
                return chapter;
            }
        };

        let pages = Arc::new(pages);
        tracing::debug!(chapter_id = %chapter.meta.id, pages = pages.len(), "chapter paginated");
        self.set_cached_pages(&chapter.meta.id, Arc::clone(&pages), layout);
        CachedChapter {
            pages,
            layout,
            ..chapter
        }
    }

    /// Drops every cached chapter and the known chapter list. Fetches already
    /// running still return their chapter but no longer cache it.
    pub fn clear_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
        self.chapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetch through the repository, letting concurrent callers for the same
    /// chapter wait on the first one instead of fetching again.
    async fn fetch_shared(&self, chapter_id: &str) -> Result<CachedChapter, ContentError> {
        let gate = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(chapter_id.to_string()).or_default())
        };

        let result = {
            let _turn = gate.lock().await;
            match self.cache.peek(chapter_id) {
                Some(cached) => {
                    tracing::debug!(chapter_id, "fetched by a concurrent caller");
                    Ok(cached)
                }
                None => self.fetch_from_repository(chapter_id).await,
            }
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = in_flight.get(chapter_id)
                && Arc::ptr_eq(current, &gate)
                && Arc::strong_count(&gate) == 2
            {
                in_flight.remove(chapter_id);
            }
        }
        result
    }

    async fn fetch_from_repository(&self, chapter_id: &str) -> Result<CachedChapter, ContentError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut result = match self.repository.get_content(chapter_id, self.strategy).await {
            Ok(Some(result)) => result,
            Ok(None) => return Err(ContentError::NotFound(chapter_id.to_string())),
            Err(e) => return Err(ContentError::Unavailable(format!("{:#}", e))),
        };

        result.chapter_id = chapter_id.to_string();
        let meta = merge_meta(&result, self.listed(chapter_id).as_ref());
        let content = normalize_content(&result.content);
        let chapter = CachedChapter::new(meta, content).ok_or_else(|| {
            ContentError::Unavailable(format!("chapter {} has no readable content", chapter_id))
        })?;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(chapter_id, "session cleared during fetch, not caching");
            return Ok(chapter);
        }
        if let Some(evicted) = self.cache.put(chapter_id.to_string(), chapter.clone()) {
            tracing::debug!(chapter_id, evicted = %evicted, "session cache full, evicted chapter");
        }
        Ok(chapter)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::reader::pagination::CellPaginator;
    use crate::reader::repository::TieredRepository;
    use crate::reader::repository::tests::FakeRemote;
    use crate::storage::DiskCache;

    pub(crate) fn service(
        remote: Arc<FakeRemote>,
        dir: &tempfile::TempDir,
        capacity: usize,
    ) -> ChapterContentService {
        service_with(remote, dir, capacity, Arc::new(CellPaginator))
    }

    pub(crate) fn service_with(
        remote: Arc<FakeRemote>,
        dir: &tempfile::TempDir,
        capacity: usize,
        paginator: Arc<dyn TextPaginator>,
    ) -> ChapterContentService {
        let repository = TieredRepository::new(
            remote,
            DiskCache::new(dir.path()),
            chrono::Duration::hours(1),
        );
        ChapterContentService::new(Arc::new(repository), paginator, capacity)
    }

    #[tokio::test]
    async fn cold_start_fetches_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2"]));
        let service = service(Arc::clone(&remote), &dir, 12);

        let first = service.get_content("ch-1").await?;
        assert!(service.is_cached("ch-1"));
        let second = service.get_content("ch-1").await?;

        assert_eq!(remote.content_calls(), 1);
        assert_eq!(first.raw_content, second.raw_content);
        assert_eq!(&*first.raw_content, "Body of ch-1.\nSecond line.");
        assert_eq!(service.cache_stats().hits, 1);
        Ok(())
    }

    #[tokio::test]
    async fn capacity_two_evicts_oldest_chapter() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2", "ch-3"]));
        let service = service(remote, &dir, 2);
        for id in ["ch-1", "ch-2", "ch-3"] {
            service.get_content(id).await?;
        }
        assert!(service.get_cached("ch-1").is_none());
        assert!(service.get_cached("ch-2").is_some());
        assert!(service.get_cached("ch-3").is_some());
        assert_eq!(service.cache_stats().eviction_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unlisted_chapter_is_not_found_without_fetching() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(Arc::clone(&remote), &dir, 4);
        assert_eq!(service.get_chapter_list("book").await.len(), 1);

        let err = service.get_content("ch-99").await.unwrap_err();
        assert_eq!(err, ContentError::NotFound("ch-99".into()));
        assert_eq!(remote.content_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_remote_chapter_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(remote, &dir, 4);
        assert!(matches!(
            service.get_content("ghost").await,
            Err(ContentError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_is_unavailable_and_not_cached() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote.fail("ch-1");
        let service = service(Arc::clone(&remote), &dir, 4);

        assert!(matches!(
            service.get_content("ch-1").await,
            Err(ContentError::Unavailable(_))
        ));
        assert!(!service.is_cached("ch-1"));

        remote.recover("ch-1");
        assert!(service.get_content("ch-1").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn fetch_running_across_clear_is_not_cached() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote.set_delay(Duration::from_millis(100));
        let service = Arc::new(service(Arc::clone(&remote), &dir, 4));

        let fetch = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.get_content("ch-1").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.clear_session();

        let chapter = fetch.await??;
        assert_eq!(&*chapter.raw_content, "Body of ch-1.\nSecond line.");
        assert!(!service.is_cached("ch-1"));
        assert_eq!(service.cache_stats().size, 0);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(Arc::clone(&remote), &dir, 4);
        assert!(matches!(
            service.get_content("   ").await,
            Err(ContentError::MalformedId(_))
        ));
        assert!(service.preload("bad\u{0}id", None).await.is_none());
        assert_eq!(remote.content_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn blank_content_is_never_cached() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote
            .bodies
            .lock()
            .unwrap()
            .insert("ch-1".into(), " \r\n\t ".into());
        let service = service(remote, &dir, 4);

        assert!(matches!(
            service.get_content("ch-1").await,
            Err(ContentError::Unavailable(_))
        ));
        assert!(service.cache_stats().size == 0);
        Ok(())
    }

    #[tokio::test]
    async fn content_is_normalized_and_named_from_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote
            .bodies
            .lock()
            .unwrap()
            .insert("ch-1".into(), "line one\r\nline two\r\n\r\n".into());
        let service = service(remote, &dir, 4);
        service.get_chapter_list("book").await;

        let chapter = service.get_content("ch-1").await?;
        assert_eq!(&*chapter.raw_content, "line one\nline two");
        assert_eq!(chapter.meta.name, "Chapter 1");
        assert_eq!(chapter.meta.ordinal, "1");
        Ok(())
    }

    #[tokio::test]
    async fn chapter_list_fails_soft() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote.list_fails.store(true, Ordering::SeqCst);
        let service = service(remote, &dir, 4);
        assert!(service.get_chapter_list("book").await.is_empty());
        assert!(service.chapter_list().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_fetch_and_preload_share_one_request() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote.set_delay(Duration::from_millis(50));
        let service = service(Arc::clone(&remote), &dir, 4);

        let (fetched, preloaded) =
            tokio::join!(service.get_content("ch-1"), service.preload("ch-1", None));
        assert!(fetched.is_ok());
        assert!(preloaded.is_some());
        assert_eq!(remote.content_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn preload_paginates_and_short_circuits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(Arc::clone(&remote), &dir, 4);
        let viewport = Viewport::default();

        let chapter = service.preload("ch-1", Some(&viewport)).await.unwrap();
        assert!(chapter.has_pages());
        assert!(service.peek_cached("ch-1").unwrap().has_pages());

        service.preload("ch-1", Some(&viewport)).await;
        service.preload("ch-1", None).await;
        assert_eq!(remote.content_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn preload_absorbs_failures() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        remote.fail("ch-1");
        let service = service(remote, &dir, 4);
        assert!(service.preload("ch-1", Some(&Viewport::default())).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn set_cached_pages_requires_a_cached_chapter() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(remote, &dir, 4);
        let page = Page {
            index: 0,
            text: "x".into(),
        };
        assert!(!service.set_cached_pages("ch-1", vec![page.clone()], None));
        service.get_content("ch-1").await?;
        assert!(service.set_cached_pages("ch-1", vec![page], None));
        assert_eq!(service.peek_cached("ch-1").unwrap().pages.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn clear_session_empties_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1"]));
        let service = service(remote, &dir, 4);
        service.get_chapter_list("book").await;
        service.get_content("ch-1").await?;

        service.clear_session();
        assert_eq!(service.cache_stats().size, 0);
        assert!(service.chapter_list().is_empty());
        Ok(())
    }
}
