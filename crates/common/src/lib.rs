//! Scriptorium Common Library
//!
//! Shared code for the Scriptorium manuscript services including:
//! - Domain model (manuscripts, files, access requests, watermark settings)
//! - Access decision engine
//! - Encryption at rest and content storage
//! - Record stores (in-memory and PostgreSQL)
//! - Error types, configuration, authentication
//! - Notifications and metrics

pub mod access;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod storage;

// Re-export commonly used types
pub use access::{decide, EffectiveLevel};
pub use auth::{Principal, Role};
pub use config::AppConfig;
pub use crypto::CryptoStore;
pub use errors::{AppError, ErrorKind, Result};
pub use storage::ContentStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings key under which the watermark settings record is persisted
pub const WATERMARK_SETTINGS_KEY: &str = "watermark";
