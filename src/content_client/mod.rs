// Network tier: talks to the remote chapter content service.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::domain::mapping::{map_chapter, map_content};
use crate::domain::{ChapterMeta, ContentResult};
use crate::reader::repository::RemoteSource;

#[derive(Clone, Debug)]
pub struct HttpSource {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a new source rooted at the given base URL (e.g. "https://books.example.com/reader").
    pub fn new(base_url: impl AsRef<str>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let base_url = Url::parse(base_url.as_ref().trim_end_matches('/'))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("content base url cannot carry a path: {}", base_url);
        }
        tracing::debug!(base_url = %base_url, "creating HttpSource");
        Ok(HttpSource {
            base_url,
            api_key: None,
            client,
        })
    }

    /// Return a source with the provided API key set (Bearer); empty keys are ignored
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn chapter_list_url(&self, book_id: &str) -> Url {
        self.url(&["api", "books", book_id, "chapters"])
    }

    pub fn chapter_content_url(&self, chapter_id: &str) -> Url {
        self.url(&["api", "chapters", chapter_id, "content"])
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// GET /api/books/{book_id}/chapters
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_chapter_list(&self, book_id: &str) -> anyhow::Result<Vec<ChapterDto>> {
        let url = self.chapter_list_url(book_id);
        tracing::debug!(%url, "GET chapter list");
        let resp = self.get(url).send().await?;
        let body = resp.error_for_status()?.text().await?;
        match serde_json::from_str::<ChapterListResponse>(&body) {
            Ok(parsed) => Ok(parsed.into_chapters()),
            Err(e) => {
                let mut snippet_len = body.len().min(2000);
                while !body.is_char_boundary(snippet_len) {
                    snippet_len -= 1;
                }
                let snippet = &body[..snippet_len];
                tracing::error!(error = %e, body_snippet = %snippet, "failed to parse chapter list");
                Err(e.into())
            }
        }
    }

    /// GET /api/chapters/{chapter_id}/content; `None` when the service answers 404
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_chapter_content(&self, chapter_id: &str) -> anyhow::Result<Option<ContentDto>> {
        let url = self.chapter_content_url(chapter_id);
        tracing::debug!(%url, "GET chapter content");
        let resp = self.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.error_for_status()?.text().await?;
        let parsed: ContentDto = serde_json::from_str(&body)?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_chapter_list(&self, book_id: &str) -> anyhow::Result<Vec<ChapterMeta>> {
        let chapters = self.get_chapter_list(book_id).await?;
        Ok(chapters.iter().enumerate().map(|(i, c)| map_chapter(i, c)).collect())
    }

    async fn fetch_content(&self, chapter_id: &str) -> anyhow::Result<Option<ContentResult>> {
        let content = self.get_chapter_content(chapter_id).await?;
        Ok(content.map(|dto| map_content(chapter_id, dto)))
    }
}

/// The service answers either a bare array or an object wrapping it.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChapterListResponse {
    Bare(Vec<ChapterDto>),
    Wrapped { chapters: Vec<ChapterDto> },
}

impl ChapterListResponse {
    pub fn into_chapters(self) -> Vec<ChapterDto> {
        match self {
            ChapterListResponse::Bare(chapters) => chapters,
            ChapterListResponse::Wrapped { chapters } => chapters,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterDto {
    #[serde(
        alias = "chapterId",
        deserialize_with = "crate::content_client::de::string_from_str_or_num"
    )]
    pub id: String,
    #[serde(alias = "title")]
    pub name: Option<String>,
    #[serde(
        alias = "order",
        deserialize_with = "crate::content_client::de::opt_string_from_str_or_num",
        default
    )]
    pub ordinal: Option<String>,
    #[serde(alias = "needPay", default)]
    pub is_premium: bool,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentDto {
    #[serde(
        alias = "id",
        deserialize_with = "crate::content_client::de::opt_string_from_str_or_num",
        default
    )]
    pub chapter_id: Option<String>,
    #[serde(alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Internal serde helpers
pub mod de {
    use serde::{Deserialize, Deserializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(i64),
        Str(String),
    }

    /// Accept a string id from either a number or a string like "1024".
    pub fn string_from_str_or_num<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(n) => Ok(n.to_string()),
            NumOrStr::Str(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            NumOrStr::Str(_) => Err(D::Error::custom("empty identifier")),
        }
    }

    /// Accept Option<String> from either a number or a string; null/"" -> None.
    pub fn opt_string_from_str_or_num<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val: Option<NumOrStr> = Option::deserialize(deserializer)?;
        Ok(match val {
            None => None,
            Some(NumOrStr::Num(n)) => Some(n.to_string()),
            Some(NumOrStr::Str(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_content_url_encodes_ids() {
        let c = HttpSource::new("http://localhost:8080/reader/").unwrap();
        assert_eq!(
            c.chapter_content_url("vol 1/ch-2").as_str(),
            "http://localhost:8080/reader/api/chapters/vol%201%2Fch-2/content"
        );
        assert_eq!(
            c.chapter_list_url("book-9").as_str(),
            "http://localhost:8080/reader/api/books/book-9/chapters"
        );
    }

    #[test]
    fn build_url_without_base_path() {
        let c = HttpSource::new("https://books.example.com").unwrap();
        assert_eq!(
            c.chapter_list_url("42").as_str(),
            "https://books.example.com/api/books/42/chapters"
        );
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let c = HttpSource::new("https://books.example.com")
            .unwrap()
            .with_api_key("");
        assert!(c.api_key.is_none());
    }

    #[test]
    fn chapter_list_deserialize_mixed_shapes() {
        let json = r#"[
            { "id": 7001, "title": "Prologue", "ordinal": 1, "isPremium": false },
            { "chapterId": "7002", "name": "Arrival", "order": "2", "needPay": true },
            { "id": "7003" }
        ]"#;
        let parsed: ChapterListResponse = serde_json::from_str(json).unwrap();
        let chapters = parsed.into_chapters();
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].id, "7001");
        assert_eq!(chapters[0].name.as_deref(), Some("Prologue"));
        assert_eq!(chapters[0].ordinal.as_deref(), Some("1"));
        assert_eq!(chapters[1].id, "7002");
        assert!(chapters[1].is_premium);
        assert_eq!(chapters[2].name, None);
        assert_eq!(chapters[2].ordinal, None);
    }

    #[test]
    fn wrapped_chapter_list_deserialize() {
        let json = r#"{ "chapters": [ { "id": "a", "name": "A" } ], "total": 1 }"#;
        let parsed: ChapterListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_chapters()[0].id, "a");
    }

    #[test]
    fn content_deserialize_example() {
        let json = r#"{ "chapterId": 7001, "title": "Prologue", "content": "It began.\r\nAgain." }"#;
        let parsed: ContentDto = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.chapter_id.as_deref(), Some("7001"));
        assert_eq!(parsed.content, "It began.\r\nAgain.");
    }
}
