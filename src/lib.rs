// Core modules
pub mod broker;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod signals;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
