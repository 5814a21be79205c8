use poem_openapi::payload::Json;

use crate::reader::ReaderLibrary;
use crate::reader_api::models::{
    CacheReportDto, CacheReportResponse, ErrorDto, SessionCloseResponse, SessionDto,
    SessionOpenResponse,
};

pub struct SessionService<'a> {
    pub library: &'a ReaderLibrary,
}

impl<'a> SessionService<'a> {
    pub fn new(library: &'a ReaderLibrary) -> Self {
        Self { library }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn open(&self, book_id: &str) -> SessionOpenResponse {
        let session = self.library.open(book_id).await;
        SessionOpenResponse::Ok(Json(SessionDto {
            session_id: session.session_id(),
            book_id: session.book_id().to_string(),
            chapters: session.chapters().into_iter().map(Into::into).collect(),
        }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn close(&self, book_id: &str) -> SessionCloseResponse {
        if self.library.close(book_id).await {
            SessionCloseResponse::NoContent
        } else {
            SessionCloseResponse::NotFound(ErrorDto::new(format!("no open session for book {}", book_id)))
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn cache_report(&self, book_id: &str) -> CacheReportResponse {
        match self.library.get(book_id).await {
            Some(session) => CacheReportResponse::Ok(Json(CacheReportDto::new(
                session.cache_stats(),
                session.estimated_total_pages(),
                session.page_ranges(),
            ))),
            None => CacheReportResponse::NotFound(ErrorDto::new(format!(
                "no open session for book {}",
                book_id
            ))),
        }
    }
}
