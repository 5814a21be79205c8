use poem_openapi::payload::Json;

use crate::reader::ReaderLibrary;
use crate::reader_api::models::{
    ErrorDto, ProgressGetResponse, ProgressPutResponse, ProgressUpdateDto,
};

pub struct ProgressService<'a> {
    pub library: &'a ReaderLibrary,
}

impl<'a> ProgressService<'a> {
    pub fn new(library: &'a ReaderLibrary) -> Self {
        Self { library }
    }

    #[tracing::instrument(level = "debug", skip(self, update))]
    pub async fn commit(&self, book_id: &str, update: ProgressUpdateDto) -> ProgressPutResponse {
        if update.chapter_id.trim().is_empty() {
            return ProgressPutResponse::BadRequest(ErrorDto::new("chapterId is required"));
        }
        let session = match self.library.get(book_id).await {
            Some(session) => session,
            None => self.library.open(book_id).await,
        };
        match session
            .commit_position(&update.chapter_id, update.position())
            .await
        {
            Ok(progress) => ProgressPutResponse::Ok(Json(progress.into())),
            Err(e) => {
                tracing::error!(error = %format!("{:?}", e), "failed to save progress");
                ProgressPutResponse::InternalError(ErrorDto::new(format!("progress not saved: {}", e)))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load(&self, book_id: &str) -> ProgressGetResponse {
        match self.library.load_progress(book_id).await {
            Ok(Some(progress)) => ProgressGetResponse::Ok(Json(progress.into())),
            Ok(None) => ProgressGetResponse::NotFound(ErrorDto::new(format!(
                "no progress saved for book {}",
                book_id
            ))),
            Err(e) => {
                tracing::error!(error = %format!("{:?}", e), "failed to load progress");
                ProgressGetResponse::InternalError(ErrorDto::new(format!("progress store error: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::reader::repository::tests::FakeRemote;
    use crate::reader_api::services::chapter::tests::library;

    #[tokio::test]
    async fn saved_progress_is_returned() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let library = library(Arc::new(FakeRemote::with_chapters(&["ch-1"])), &dir);
        let service = ProgressService::new(&library);

        assert!(matches!(service.load("book-1").await, ProgressGetResponse::NotFound(_)));

        let update = ProgressUpdateDto {
            chapter_id: "ch-1".into(),
            page_index: Some(-1),
        };
        match service.commit("book-1", update).await {
            ProgressPutResponse::Ok(Json(dto)) => {
                assert_eq!(dto.page_index, -1);
                assert_eq!(dto.chapter_progress, 0.0);
            }
            _ => panic!("expected saved progress"),
        }
        match service.load("book-1").await {
            ProgressGetResponse::Ok(Json(dto)) => assert_eq!(dto.chapter_id, "ch-1"),
            _ => panic!("expected stored progress"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn blank_chapter_id_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let library = library(Arc::new(FakeRemote::with_chapters(&["ch-1"])), &dir);
        let update = ProgressUpdateDto {
            chapter_id: "  ".into(),
            page_index: Some(0),
        };
        assert!(matches!(
            ProgressService::new(&library).commit("book-1", update).await,
            ProgressPutResponse::BadRequest(_)
        ));
        Ok(())
    }
}
