//! Reader core: session cache, tiered chapter fetch, pagination, progress and
//! prefetch, wired together by [`session::ReaderSession`].

pub mod content_service;
pub mod pagination;
pub mod prefetch;
pub mod progress;
pub mod repository;
pub mod session;
pub mod session_cache;

pub use content_service::{ChapterContentService, ContentError};
pub use pagination::{CellPaginator, PaginationCoordinator, TextPaginator};
pub use prefetch::{PrefetchDirection, PrefetchScheduler};
pub use progress::ProgressTracker;
pub use repository::{ContentRepository, FetchStrategy, RemoteSource, TieredRepository};
pub use session::{OpenedChapter, ReaderLibrary, ReaderSession};
pub use session_cache::{CacheStats, SessionCache};
