pub mod reading_progress;

pub mod prelude {
    pub use super::reading_progress::Entity as ReadingProgress;
}
