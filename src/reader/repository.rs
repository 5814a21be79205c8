use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ChapterMeta, ContentResult};
use crate::storage::DiskCache;

/// Tier ordering for a repository lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Ask the network first and fall back to the last disk copy.
    NetworkFirst,
    /// Serve a usable disk copy; only go to the network on a miss or when stale.
    CacheFirst,
}

#[derive(Debug, Error)]
#[error("unknown fetch strategy {0:?}, expected network_first or cache_first")]
pub struct UnknownStrategy(String);

impl FromStr for FetchStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "network_first" => Ok(FetchStrategy::NetworkFirst),
            "cache_first" => Ok(FetchStrategy::CacheFirst),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Source of chapter lists and chapter bodies behind the session cache.
///
/// `Ok(None)` from `get_content` means the chapter does not exist; `Err` is a
/// transient failure.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn get_chapter_list(
        &self,
        book_id: &str,
        strategy: FetchStrategy,
    ) -> anyhow::Result<Vec<ChapterMeta>>;

    async fn get_content(
        &self,
        chapter_id: &str,
        strategy: FetchStrategy,
    ) -> anyhow::Result<Option<ContentResult>>;
}

/// The network tier. Same `Ok(None)` / `Err` contract as [`ContentRepository`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_chapter_list(&self, book_id: &str) -> anyhow::Result<Vec<ChapterMeta>>;
    async fn fetch_content(&self, chapter_id: &str) -> anyhow::Result<Option<ContentResult>>;
}

/// Disk-then-network repository. Chapter bodies never go stale on disk;
/// chapter lists are refreshed once older than `chapter_list_max_age`.
pub struct TieredRepository {
    remote: Arc<dyn RemoteSource>,
    disk: DiskCache,
    chapter_list_max_age: chrono::Duration,
}

impl TieredRepository {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        disk: DiskCache,
        chapter_list_max_age: chrono::Duration,
    ) -> Self {
        Self {
            remote,
            disk,
            chapter_list_max_age,
        }
    }

    async fn remember_content(&self, content: &ContentResult) {
        if let Err(e) = self.disk.store_content(content).await {
            tracing::warn!(chapter_id = %content.chapter_id, error = %format!("{:?}", e), "failed to write chapter to disk cache");
        }
    }

    async fn remember_chapter_list(&self, book_id: &str, chapters: &[ChapterMeta]) {
        if let Err(e) = self.disk.store_chapter_list(book_id, chapters).await {
            tracing::warn!(%book_id, error = %format!("{:?}", e), "failed to write chapter list to disk cache");
        }
    }
}

#[async_trait]
impl ContentRepository for TieredRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_chapter_list(
        &self,
        book_id: &str,
        strategy: FetchStrategy,
    ) -> anyhow::Result<Vec<ChapterMeta>> {
        let on_disk = self.disk.load_chapter_list(book_id).await;
        if strategy == FetchStrategy::CacheFirst
            && let Some(entry) = &on_disk
            && !entry.is_older_than(self.chapter_list_max_age)
        {
            tracing::debug!(chapters = entry.value.len(), "chapter list served from disk");
            return Ok(entry.value.clone());
        }

        match self.remote.fetch_chapter_list(book_id).await {
            Ok(chapters) => {
                self.remember_chapter_list(book_id, &chapters).await;
                Ok(chapters)
            }
            Err(e) => match on_disk {
                Some(entry) => {
                    tracing::warn!(error = %e, stored_at = %entry.stored_at, "network failed, serving last known chapter list");
                    Ok(entry.value)
                }
                None => Err(e),
            },
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_content(
        &self,
        chapter_id: &str,
        strategy: FetchStrategy,
    ) -> anyhow::Result<Option<ContentResult>> {
        if strategy == FetchStrategy::CacheFirst
            && let Some(entry) = self.disk.load_content(chapter_id).await
        {
            tracing::debug!("chapter served from disk");
            return Ok(Some(entry.value));
        }

        match self.remote.fetch_content(chapter_id).await {
            Ok(Some(content)) => {
                self.remember_content(&content).await;
                Ok(Some(content))
            }
            Ok(None) => Ok(None),
            Err(e) if strategy == FetchStrategy::NetworkFirst => {
                match self.disk.load_content(chapter_id).await {
                    Some(entry) => {
                        tracing::warn!(error = %e, "network failed, serving chapter from disk");
                        Ok(Some(entry.value))
                    }
                    None => Err(e),
                }
            }
            // CacheFirst already missed on disk.
            Err(e) => Err(e),
        }
    }
}
