use std::sync::Arc;

use poem_openapi::{
    OpenApi,
    param::{Path, Query},
    payload::{Json, PlainText},
};

use super::models::{
    CacheReportResponse, ChapterResponse, ProgressGetResponse, ProgressPutResponse,
    ProgressUpdateDto, SessionCloseResponse, SessionOpenResponse,
};
use super::services::{
    chapter::{ChapterService, ViewportQuery},
    health::HealthService,
    progress::ProgressService,
    session::SessionService,
};
use crate::reader::ReaderLibrary;

pub struct ReaderApi {
    pub library: Arc<ReaderLibrary>,
}

#[OpenApi]
impl ReaderApi {
    #[oai(path = "/status", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn status(&self) -> PlainText<String> {
        HealthService::new(&self.library).status_text().await
    }

    /// Open (or refresh) the reading session of a book
    #[oai(path = "/v1/books/:book_id/session", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, book_id))]
    async fn open_session(&self, book_id: Path<String>) -> SessionOpenResponse {
        SessionService::new(&self.library).open(&book_id.0).await
    }

    /// End the reading session: cancels prefetches and drops cached chapters
    #[oai(path = "/v1/books/:book_id/session", method = "delete")]
    #[tracing::instrument(level = "debug", skip(self, book_id))]
    async fn close_session(&self, book_id: Path<String>) -> SessionCloseResponse {
        SessionService::new(&self.library).close(&book_id.0).await
    }

    /// Chapter pages for a viewport
    #[allow(clippy::too_many_arguments)]
    #[oai(path = "/v1/books/:book_id/chapters/:chapter_id", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, book_id, chapter_id, width, height, font_size, line_height, density))]
    async fn chapter(
        &self,
        book_id: Path<String>,
        chapter_id: Path<String>,
        /// Viewport width in px
        Query(width): Query<Option<f32>>,
        /// Viewport height in px
        Query(height): Query<Option<f32>>,
        /// Font size in pt
        Query(font_size): Query<Option<f32>>,
        /// Line height multiplier
        Query(line_height): Query<Option<f32>>,
        /// Display density
        Query(density): Query<Option<f32>>,
    ) -> ChapterResponse {
        tracing::debug!(book_id = %book_id.0, chapter_id = %chapter_id.0, "handling chapter");
        let viewport = ViewportQuery {
            width,
            height,
            font_size,
            line_height,
            density,
        };
        ChapterService::new(&self.library)
            .open_chapter(&book_id.0, &chapter_id.0, viewport)
            .await
    }

    /// Commit the reader's position
    #[oai(path = "/v1/books/:book_id/progress", method = "put")]
    #[tracing::instrument(level = "debug", skip(self, book_id, body))]
    async fn put_progress(
        &self,
        book_id: Path<String>,
        body: Json<ProgressUpdateDto>,
    ) -> ProgressPutResponse {
        ProgressService::new(&self.library)
            .commit(&book_id.0, body.0)
            .await
    }

    /// Last saved position
    #[oai(path = "/v1/books/:book_id/progress", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, book_id))]
    async fn get_progress(&self, book_id: Path<String>) -> ProgressGetResponse {
        ProgressService::new(&self.library).load(&book_id.0).await
    }

    /// Session cache statistics and page index state
    #[oai(path = "/v1/books/:book_id/cache", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, book_id))]
    async fn cache(&self, book_id: Path<String>) -> CacheReportResponse {
        SessionService::new(&self.library)
            .cache_report(&book_id.0)
            .await
    }
}
