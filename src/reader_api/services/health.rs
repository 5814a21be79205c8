use poem_openapi::payload::PlainText;

use crate::reader::ReaderLibrary;

pub struct HealthService<'a> {
    pub library: &'a ReaderLibrary,
}

impl<'a> HealthService<'a> {
    pub fn new(library: &'a ReaderLibrary) -> Self {
        Self { library }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn status_text(&self) -> PlainText<String> {
        PlainText(format!(
            "{} version={} open_sessions={}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.library.open_sessions().await
        ))
    }
}
