pub mod chapter;
pub mod health;
pub mod progress;
pub mod session;
