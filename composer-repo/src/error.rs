//! # Error Handling and Response Types
//!
//! This module provides error handling for the Composer repository server.
//! It defines the error type shared by the registry, archive, storage and proxy
//! layers, and maps each error onto an HTTP status code so that handlers can
//! simply return [`AppResult`].
//!
//! ## Key Types
//!
//! - [`AppError`]: Main error enum covering all possible application errors
//! - [`ApiErrorResponse`]: Standardized JSON error response format
//! - [`ErrorCode`]: Machine-readable error classification
//! - [`AppResult<T>`]: Convenience type alias for Results using `AppError`
//!
//! ## Error Response Format
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": {...},
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```
//!
//! ## Error Classifications
//!
//! - **Validation Errors** (400): malformed package names, upload paths
//! - **Content Errors** (422): registry without `packages`, manifest without
//!   `name`/`version`, archive without `composer.json`
//! - **Archive Errors** (400): uploaded bytes are not a readable ZIP
//! - **Not Found** (404): missing registry documents or artifacts
//! - **Upstream Errors** (502): remote registry failures that were not recovered
//! - **Config / Internal Errors** (500): server-side problems

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,          // Human-readable error message
    pub code: String,           // Machine-readable error code
    pub details: Option<Value>, // Additional error details
    pub timestamp: String,      // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ValidationError, // For input validation failures
    ContentError,    // For documents that break the registry/manifest contract
    ArchiveError,    // For unreadable archives
    NotFound,        // For missing resources
    UpstreamError,   // For remote registry failures
    ConfigError,     // For missing or invalid configuration
    InternalError,   // For server-side errors
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::ContentError => "content_error",
            ErrorCode::ArchiveError => "archive_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::ConfigError => "config_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::ContentError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ArchiveError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidContent(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::Json(_) => ErrorCode::ValidationError,
            AppError::InvalidContent(_) => ErrorCode::ContentError,
            AppError::Archive(_) => ErrorCode::ArchiveError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Upstream(_) => ErrorCode::UpstreamError,
            AppError::Config(_) => ErrorCode::ConfigError,
            AppError::InternalError(_) | AppError::Io(_) | AppError::Anyhow(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Anyhow(e) => e
                .source()
                .map(|source| json!({"source": source.to_string()})),
            AppError::Archive(e) => Some(json!({"source": e.to_string()})),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_response = self.to_error_response();
        let status = self.error_code().http_status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        tracing::debug!(status = %status, code = %error_response.code, "Returning standardized error response");

        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;
