//! Configuration management for Scriptorium services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Record store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Encryption at rest
    #[serde(default)]
    pub crypto: CryptoConfig,

    /// Access request workflow limits
    #[serde(default)]
    pub access_requests: AccessRequestConfig,

    /// Watermark defaults
    #[serde(default)]
    pub watermark: WatermarkConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Storage I/O retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Notification delivery
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which record store implementation backs the services
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Record store implementation
    #[serde(default = "default_database_backend")]
    pub backend: DatabaseBackend,

    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which blob store implementation holds encrypted content
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackendKind,

    /// Root directory for the local backend
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct CryptoConfig {
    /// Legacy process-wide key: 64 hex chars, or a passphrase hashed to 32 bytes
    pub master_key: Option<String>,

    /// Key id used for new uploads; `None` keeps using the master key
    pub active_key_id: Option<String>,

    /// Additional named keys for rotation
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .field("active_key_id", &self.active_key_id)
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessRequestConfig {
    /// Minimum justification length in characters
    #[serde(default = "default_min_justification")]
    pub min_justification_chars: u64,

    /// Minimum purpose length in characters
    #[serde(default = "default_min_purpose")]
    pub min_purpose_chars: u64,

    /// Longest grant a requester may ask for or a reviewer may approve
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,

    /// Age after which a PENDING request stops blocking a new one
    #[serde(default = "default_pending_expiry_days")]
    pub pending_expiry_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatermarkConfig {
    /// Default watermark text used until an admin saves settings
    #[serde(default = "default_watermark_text")]
    pub default_text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared secret for HS256 bearer tokens
    pub jwt_secret: Option<String>,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts per storage operation, including the first
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_retry_initial")]
    pub initial_interval_ms: u64,

    /// Upper bound for a single backoff interval in milliseconds
    #[serde(default = "default_retry_max")]
    pub max_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Webhook receiving access request transitions; logging only when unset
    pub webhook_url: Option<String>,

    /// Webhook timeout in seconds
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_upload_bytes() -> usize { 50 * 1024 * 1024 }
fn default_database_backend() -> DatabaseBackend { DatabaseBackend::Memory }
fn default_database_url() -> String { "postgres://localhost/scriptorium".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_storage_backend() -> StorageBackendKind { StorageBackendKind::Local }
fn default_storage_root() -> String { "./data/blobs".to_string() }
fn default_min_justification() -> u64 { 50 }
fn default_min_purpose() -> u64 { 10 }
fn default_max_duration_days() -> u32 { 365 }
fn default_pending_expiry_days() -> u32 { 30 }
fn default_watermark_text() -> String { "Scriptorium Manuscript Repository".to_string() }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_request_id_header() -> String { "X-Request-ID".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "scriptorium".to_string() }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_initial() -> u64 { 100 }
fn default_retry_max() -> u64 { 2000 }
fn default_notification_timeout() -> u64 { 10 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root_dir: default_storage_root(),
        }
    }
}

impl Default for AccessRequestConfig {
    fn default() -> Self {
        Self {
            min_justification_chars: default_min_justification(),
            min_purpose_chars: default_min_purpose(),
            max_duration_days: default_max_duration_days(),
            pending_expiry_days: default_pending_expiry_days(),
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            default_text: default_watermark_text(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expiration_secs: default_jwt_expiration(),
            request_id_header: default_request_id_header(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_interval_ms: default_retry_initial(),
            max_interval_ms: default_retry_max(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notification_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            crypto: CryptoConfig::default(),
            access_requests: AccessRequestConfig::default(),
            watermark: WatermarkConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            retry: RetryConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.access_requests.min_justification_chars, 50);
        assert_eq!(config.access_requests.min_purpose_chars, 10);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/scriptorium");
    }

    #[test]
    fn test_crypto_debug_redacts_keys() {
        let mut config = CryptoConfig::default();
        config.master_key = Some("super-secret".to_string());
        config.keys.insert("k2".to_string(), "another-secret".to_string());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("another-secret"));
        assert!(rendered.contains("k2"));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "server": { "port": 9000 },
            "storage": { "backend": "memory" }
        }))
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
