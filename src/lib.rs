// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod signal;
pub mod trader;
pub mod util;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
