//! Chapter content delivery core for a serialized e-book reader: session
//! caching, tiered fetch, pagination, page indexing and reading progress.

pub mod config;
pub mod content_client;
pub mod domain;
pub mod reader;
pub mod reader_api;
pub mod storage;

pub type ReaderResult<T> = anyhow::Result<T>;
