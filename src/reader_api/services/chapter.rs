use std::sync::Arc;

use poem_openapi::payload::Json;

use crate::domain::Viewport;
use crate::reader::{ContentError, ReaderLibrary, ReaderSession};
use crate::reader_api::models::{ChapterResponse, ErrorDto};

/// Viewport overrides taken from the query string. Missing values keep the
/// session's current viewport.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewportQuery {
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub font_size: Option<f32>,
    pub line_height: Option<f32>,
    pub density: Option<f32>,
}

impl ViewportQuery {
    pub fn apply(&self, base: Viewport) -> Viewport {
        Viewport {
            width_px: self.width.unwrap_or(base.width_px),
            height_px: self.height.unwrap_or(base.height_px),
            font_size_pt: self.font_size.unwrap_or(base.font_size_pt),
            line_height: self.line_height.unwrap_or(base.line_height),
            density: self.density.unwrap_or(base.density),
        }
    }
}

pub struct ChapterService<'a> {
    pub library: &'a ReaderLibrary,
}

impl<'a> ChapterService<'a> {
    pub fn new(library: &'a ReaderLibrary) -> Self {
        Self { library }
    }

    async fn session(&self, book_id: &str) -> Arc<ReaderSession> {
        match self.library.get(book_id).await {
            Some(session) => session,
            None => self.library.open(book_id).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn open_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
        viewport: ViewportQuery,
    ) -> ChapterResponse {
        let session = self.session(book_id).await;
        session.set_viewport(viewport.apply(session.viewport()));

        match session.open_chapter(chapter_id).await {
            Ok(opened) => ChapterResponse::Ok(Json(opened.into())),
            Err(e @ ContentError::MalformedId(_)) => ChapterResponse::BadRequest(ErrorDto::new(e.to_string())),
            Err(e @ ContentError::NotFound(_)) => ChapterResponse::NotFound(ErrorDto::new(e.to_string())),
            Err(e @ ContentError::Unavailable(_)) => {
                ChapterResponse::BadGateway(ErrorDto::new(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reader::repository::tests::FakeRemote;
    use crate::reader::{ContentRepository, ProgressTracker, TieredRepository};
    use crate::storage::{DiskCache, MemoryProgressStore};

    pub(crate) fn library(remote: Arc<FakeRemote>, dir: &tempfile::TempDir) -> ReaderLibrary {
        let repository: Arc<dyn ContentRepository> = Arc::new(TieredRepository::new(
            remote,
            DiskCache::new(dir.path()),
            chrono::Duration::hours(1),
        ));
        ReaderLibrary::new(
            repository,
            Arc::new(ProgressTracker::new(Arc::new(MemoryProgressStore::new()))),
            12,
        )
    }

    #[test]
    fn query_overrides_only_given_fields() {
        let query = ViewportQuery {
            font_size: Some(24.0),
            ..ViewportQuery::default()
        };
        let viewport = query.apply(Viewport::default());
        assert_eq!(viewport.font_size_pt, 24.0);
        assert_eq!(viewport.width_px, Viewport::default().width_px);
    }

    #[tokio::test]
    async fn maps_content_errors_to_statuses() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let remote = Arc::new(FakeRemote::with_chapters(&["ch-1", "ch-2"]));
        remote.fail("ch-2");
        let library = library(remote, &dir);
        let service = ChapterService::new(&library);
        let query = ViewportQuery::default();

        match service.open_chapter("book-1", "ch-1", query).await {
            ChapterResponse::Ok(Json(dto)) => {
                assert!(dto.is_first);
                assert_eq!(dto.pages.concat(), "Body of ch-1.\nSecond line.");
            }
            _ => panic!("expected chapter pages"),
        }
        assert!(matches!(
            service.open_chapter("book-1", "missing", query).await,
            ChapterResponse::NotFound(_)
        ));
        assert!(matches!(
            service.open_chapter("book-1", "ch-2", query).await,
            ChapterResponse::BadGateway(_)
        ));
        assert!(matches!(
            service.open_chapter("book-1", " ", query).await,
            ChapterResponse::BadRequest(_)
        ));
        Ok(())
    }
}
