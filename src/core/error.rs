//! Error type system for Curator
//!
//! This module provides the error taxonomy shared by the sync engine, the rule
//! engine, the rule-builder and the scheduler:
//! - Validation and not-found errors reported to callers without state change
//! - Provider errors (catalog adapters, AI chat) that are recoverable per item
//! - Persistence errors that are fatal to the current operation
//! - HTTP status code mapping with trace IDs for the operational API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Main error type for Curator
#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    // Input errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Collaborator errors (catalog providers, AI chat)
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Background execution errors
    #[error("Task error: {0}")]
    TaskError(String),
}

impl CuratorError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CuratorError::ValidationError(_) | CuratorError::SerializationError(_) => {
                StatusCode::BAD_REQUEST
            }

            CuratorError::NotFound(_) => StatusCode::NOT_FOUND,

            CuratorError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,

            CuratorError::ProviderError(_) => StatusCode::BAD_GATEWAY,

            CuratorError::InitializationError(_)
            | CuratorError::ConfigError(_)
            | CuratorError::DatabaseError(_)
            | CuratorError::PoolError(_)
            | CuratorError::IoError(_)
            | CuratorError::TaskError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            CuratorError::InitializationError(_) => "InitializationError",
            CuratorError::ConfigError(_) => "ConfigError",
            CuratorError::DatabaseError(_) => "DatabaseError",
            CuratorError::PoolError(_) => "PoolError",
            CuratorError::ValidationError(_) => "ValidationError",
            CuratorError::NotFound(_) => "NotFound",
            CuratorError::ProviderError(_) => "ProviderError",
            CuratorError::Timeout(_) => "Timeout",
            CuratorError::IoError(_) => "IoError",
            CuratorError::SerializationError(_) => "SerializationError",
            CuratorError::TaskError(_) => "TaskError",
        }
    }

    /// Whether a later attempt at the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CuratorError::DatabaseError(_)
                | CuratorError::PoolError(_)
                | CuratorError::ProviderError(_)
                | CuratorError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for CuratorError {
    fn from(err: serde_json::Error) -> Self {
        CuratorError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for CuratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CuratorError::Timeout(err.to_string())
        } else {
            CuratorError::ProviderError(err.to_string())
        }
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from a CuratorError
    pub fn from_error(error: &CuratorError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (trace_id: {})",
            self.error, self.message, self.trace_id
        )
    }
}

/// Implement IntoResponse for CuratorError to enable automatic error handling in Axum
impl IntoResponse for CuratorError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        if status_code.is_server_error() {
            tracing::error!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request failed: {}",
                self
            );
        } else {
            tracing::warn!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request rejected: {}",
                self
            );
        }

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with CuratorError
pub type Result<T> = std::result::Result<T, CuratorError>;
