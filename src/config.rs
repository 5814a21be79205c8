use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::reader::FetchStrategy;

#[derive(Debug, Clone)]
pub struct Config {
    pub content_base_url: String,
    pub content_api_key: String,
    pub cache_dir: PathBuf,
    pub db_connection_string: String,
    pub session_cache_capacity: usize,
    pub chapter_list_max_age_secs: u64,
    pub fetch_strategy: FetchStrategy,
    pub bind_addr: String,
}

const DEFAULT_CACHE_DIR: &str = ".reader-cache";
const DEFAULT_DB_CONNECTION_STRING: &str = "sqlite://reader.sqlite?mode=rwc";
const DEFAULT_SESSION_CACHE_CAPACITY: usize = 12;
const DEFAULT_CHAPTER_LIST_MAX_AGE_SECS: u64 = 3600;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, value)),
        None => Ok(default),
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Config {
            content_base_url: lookup("CONTENT_BASE_URL").unwrap_or_default(),
            content_api_key: lookup("CONTENT_API_KEY").unwrap_or_default(),
            cache_dir: lookup("CACHE_DIR")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.into())
                .into(),
            db_connection_string: lookup("DB_CONNECTION_STRING")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_DB_CONNECTION_STRING.into()),
            session_cache_capacity: parse_or(
                "SESSION_CACHE_CAPACITY",
                lookup("SESSION_CACHE_CAPACITY"),
                DEFAULT_SESSION_CACHE_CAPACITY,
            )?,
            chapter_list_max_age_secs: parse_or(
                "CHAPTER_LIST_MAX_AGE_SECS",
                lookup("CHAPTER_LIST_MAX_AGE_SECS"),
                DEFAULT_CHAPTER_LIST_MAX_AGE_SECS,
            )?,
            fetch_strategy: parse_or(
                "FETCH_STRATEGY",
                lookup("FETCH_STRATEGY"),
                FetchStrategy::CacheFirst,
            )?,
            bind_addr: lookup("BIND_ADDR")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.content_base_url.is_empty() {
            anyhow::bail!("CONTENT_BASE_URL is missing");
        }
        if self.session_cache_capacity == 0 {
            anyhow::bail!("SESSION_CACHE_CAPACITY must be at least 1");
        }
        Ok(())
    }

    pub fn chapter_list_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.chapter_list_max_age_secs).unwrap_or(i64::MAX))
    }
}
