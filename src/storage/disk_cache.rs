use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::domain::{ChapterMeta, ContentResult};

const CHAPTER_LISTS_DIR: &str = "chapter_lists";
const CONTENT_DIR: &str = "content";

/// Persistent tier of the tiered fetch: one JSON file per chapter list and
/// per chapter body.
#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry<T> {
    pub stored_at: DateTime<Utc>,
    pub value: T,
}

impl<T> DiskEntry<T> {
    pub fn is_older_than(&self, max_age: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.stored_at) > max_age
    }
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, kind: &str, id: &str) -> PathBuf {
        self.root
            .join(kind)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(id)))
    }

    pub async fn load_chapter_list(&self, book_id: &str) -> Option<DiskEntry<Vec<ChapterMeta>>> {
        self.load(&self.path_for(CHAPTER_LISTS_DIR, book_id)).await
    }

    pub async fn store_chapter_list(
        &self,
        book_id: &str,
        chapters: &[ChapterMeta],
    ) -> anyhow::Result<()> {
        self.store(&self.path_for(CHAPTER_LISTS_DIR, book_id), chapters)
            .await
    }

    pub async fn load_content(&self, chapter_id: &str) -> Option<DiskEntry<ContentResult>> {
        self.load(&self.path_for(CONTENT_DIR, chapter_id)).await
    }

    pub async fn store_content(&self, content: &ContentResult) -> anyhow::Result<()> {
        self.store(&self.path_for(CONTENT_DIR, &content.chapter_id), content)
            .await
    }

    /// Any failure to read or decode is a miss. Undecodable files are removed
    /// so the next fetch can replace them from the network.
    async fn load<T: DeserializeOwned>(&self, path: &Path) -> Option<DiskEntry<T>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read disk cache entry");
                return None;
            }
        };
        match serde_json::from_slice::<DiskEntry<T>>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt disk cache entry");
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::debug!(path = %path.display(), error = %e, "failed to remove corrupt entry");
                }
                None
            }
        }
    }

    async fn store<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Borrowed<'a, T: ?Sized> {
            stored_at: DateTime<Utc>,
            value: &'a T,
        }

        let dir = path
            .parent()
            .with_context(|| format!("cache path has no parent: {}", path.display()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;
        let body = serde_json::to_vec(&Borrowed {
            stored_at: Utc::now(),
            value,
        })?;
        // Write aside and rename so readers never observe a half-written file.
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), error = %cleanup, "failed to remove temporary cache file");
            }
            return Err(e).with_context(|| format!("Failed to move cache entry into {}", path.display()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(id: &str, body: &str) -> ContentResult {
        ContentResult {
            chapter_id: id.to_string(),
            title: None,
            content: body.to_string(),
        }
    }

    #[tokio::test]
    async fn content_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = DiskCache::new(dir.path());
        assert!(cache.load_content("vol/1").await.is_none());

        cache.store_content(&content("vol/1", "hello")).await?;
        let entry = cache.load_content("vol/1").await.unwrap();
        assert_eq!(entry.value, content("vol/1", "hello"));
        assert!(!entry.is_older_than(chrono::Duration::minutes(5)));
        Ok(())
    }

    #[tokio::test]
    async fn chapter_list_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = DiskCache::new(dir.path());
        let chapters = vec![ChapterMeta {
            id: "c1".into(),
            name: "One".into(),
            ordinal: "1".into(),
            is_premium: false,
        }];
        cache.store_chapter_list("book", &chapters).await?;
        assert_eq!(cache.load_chapter_list("book").await.unwrap().value, chapters);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_and_removed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = DiskCache::new(dir.path());
        let path = cache.path_for(CONTENT_DIR, "ch-1");
        tokio::fs::create_dir_all(path.parent().unwrap()).await?;
        tokio::fs::write(&path, b"{not json").await?;

        assert!(cache.load_content("ch-1").await.is_none());
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_move_leaves_no_temporary_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = DiskCache::new(dir.path());
        // A non-empty directory where the entry should go makes the rename fail.
        let path = cache.path_for(CONTENT_DIR, "ch-1");
        tokio::fs::create_dir_all(path.join("occupied")).await?;

        assert!(cache.store_content(&content("ch-1", "hello")).await.is_err());
        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert!(names.iter().all(|name| !name.ends_with(".tmp")), "{names:?}");
        Ok(())
    }
}
