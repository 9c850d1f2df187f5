//! Error types for Scriptorium services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - A coarse taxonomy (`ErrorKind`) shared by every operation
//! - HTTP status code mapping
//! - Structured error responses
//!
//! Error messages name the failure and the affected id. They never carry key
//! material, ciphertext or another viewer's watermark attribution.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse failure taxonomy returned by every boundary operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    CorruptData,
    UnsupportedFormat,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::CorruptData => "corrupt_data",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    PayloadTooLarge,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidToken,
    ExpiredToken,

    // Authorization errors (3xxx)
    Forbidden,
    InsufficientAccess,

    // Resource errors (4xxx)
    NotFound,
    ManuscriptNotFound,
    FileNotFound,
    AccessRequestNotFound,

    // Conflict errors (5xxx)
    DuplicateAccessRequest,

    // Data integrity errors (6xxx)
    CorruptData,
    ChecksumMismatch,

    // Format errors (7xxx)
    UnsupportedFormat,
    ExtractionUnavailable,

    // Backing service errors (8xxx)
    DatabaseError,
    ConnectionError,
    StorageError,
    NotificationError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::PayloadTooLarge => 1002,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidToken => 2002,
            ErrorCode::ExpiredToken => 2003,

            ErrorCode::Forbidden => 3001,
            ErrorCode::InsufficientAccess => 3002,

            ErrorCode::NotFound => 4001,
            ErrorCode::ManuscriptNotFound => 4002,
            ErrorCode::FileNotFound => 4003,
            ErrorCode::AccessRequestNotFound => 4004,

            ErrorCode::DuplicateAccessRequest => 5001,

            ErrorCode::CorruptData => 6001,
            ErrorCode::ChecksumMismatch => 6002,

            ErrorCode::UnsupportedFormat => 7001,
            ErrorCode::ExtractionUnavailable => 7002,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::ConnectionError => 8002,
            ErrorCode::StorageError => 8003,
            ErrorCode::NotificationError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid bearer token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Insufficient access to manuscript {manuscript_id}: requires {required}")]
    InsufficientAccess {
        manuscript_id: String,
        required: String,
    },

    // Resource errors
    #[error("Manuscript not found: {id}")]
    ManuscriptNotFound { id: String },

    #[error("File not found: manuscript {manuscript_id} has no file at slot {slot}")]
    FileNotFound { manuscript_id: String, slot: usize },

    #[error("Access request not found or already reviewed: {id}")]
    AccessRequestNotFound { id: String },

    #[error("Blob not found: {key}")]
    BlobNotFound { key: String },

    // Conflict errors
    #[error("An open access request {existing_id} already exists for manuscript {manuscript_id}")]
    DuplicateAccessRequest {
        existing_id: String,
        manuscript_id: String,
    },

    // Data integrity errors
    #[error("Corrupt data for {resource}: {message}")]
    CorruptData { resource: String, message: String },

    #[error("Checksum mismatch for {resource}")]
    ChecksumMismatch { resource: String },

    // Format errors
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Forensic watermark extraction is unavailable")]
    ExtractionUnavailable,

    // Backing service errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Storage error for {key}: {message}")]
    Storage { key: String, message: String },

    #[error("Notification error: {message}")]
    Notification { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::InsufficientAccess { .. } => ErrorCode::InsufficientAccess,
            AppError::ManuscriptNotFound { .. } => ErrorCode::ManuscriptNotFound,
            AppError::FileNotFound { .. } => ErrorCode::FileNotFound,
            AppError::AccessRequestNotFound { .. } => ErrorCode::AccessRequestNotFound,
            AppError::BlobNotFound { .. } => ErrorCode::NotFound,
            AppError::DuplicateAccessRequest { .. } => ErrorCode::DuplicateAccessRequest,
            AppError::CorruptData { .. } => ErrorCode::CorruptData,
            AppError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            AppError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            AppError::ExtractionUnavailable => ErrorCode::ExtractionUnavailable,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Notification { .. } => ErrorCode::NotificationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the taxonomy kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation { .. } | AppError::PayloadTooLarge { .. } => ErrorKind::Validation,

            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                ErrorKind::Unauthorized
            }

            AppError::Forbidden { .. } | AppError::InsufficientAccess { .. } => ErrorKind::Forbidden,

            AppError::ManuscriptNotFound { .. }
            | AppError::FileNotFound { .. }
            | AppError::AccessRequestNotFound { .. }
            | AppError::BlobNotFound { .. } => ErrorKind::NotFound,

            AppError::DuplicateAccessRequest { .. } => ErrorKind::Conflict,

            AppError::CorruptData { .. } | AppError::ChecksumMismatch { .. } => {
                ErrorKind::CorruptData
            }

            AppError::UnsupportedFormat { .. } | AppError::ExtractionUnavailable => {
                ErrorKind::UnsupportedFormat
            }

            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Storage { .. }
            | AppError::Notification { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ExtractionUnavailable => StatusCode::NOT_IMPLEMENTED,
            AppError::DatabaseConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage { .. } | AppError::Notification { .. } => StatusCode::BAD_GATEWAY,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorKind::CorruptData | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only backing-service failures qualify; corrupt data never does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::DatabaseConnection { .. }
                | AppError::Storage { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Shorthand for a field-scoped validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Shorthand for a role/ownership failure
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: message.into(),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let kind = self.kind();

        // Backing-service messages may name hosts or paths; keep them in logs only
        let message = if kind == ErrorKind::Internal {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                kind,
                message,
                field,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::ManuscriptNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::ManuscriptNotFound);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_not_found_variants_name_their_resource() {
        let cases = [
            (AppError::FileNotFound { manuscript_id: "m".into(), slot: 3 }, ErrorCode::FileNotFound),
            (AppError::AccessRequestNotFound { id: "r".into() }, ErrorCode::AccessRequestNotFound),
            (AppError::BlobNotFound { key: "k".into() }, ErrorCode::NotFound),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.kind(), ErrorKind::NotFound);
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("justification", "too short");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(
            AppError::DuplicateAccessRequest {
                existing_id: "a".into(),
                manuscript_id: "m".into(),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AppError::ChecksumMismatch { resource: "f".into() }.kind(),
            ErrorKind::CorruptData
        );
        assert_eq!(
            AppError::UnsupportedFormat { format: "text".into() }.kind(),
            ErrorKind::UnsupportedFormat
        );
        assert_eq!(
            AppError::Storage { key: "k".into(), message: "io".into() }.kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable_only_for_backing_services() {
        assert!(AppError::Storage { key: "k".into(), message: "timeout".into() }.is_retryable());
        assert!(!AppError::CorruptData { resource: "f".into(), message: "tag".into() }.is_retryable());
        assert!(!AppError::forbidden("nope").is_retryable());
    }

    #[test]
    fn test_extraction_unavailable_is_not_implemented() {
        let err = AppError::ExtractionUnavailable;
        assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert!(err.is_server_error());
    }
}
