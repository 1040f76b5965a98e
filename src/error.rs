//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Backend Error Enum ==
/// Errors reported by a backing store collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Store could not be reached (connection refused, pool exhausted)
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded the configured timeout
    #[error("Backing store call timed out after {0} ms")]
    Timeout(u64),

    /// Write conflict reported by the store
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Table does not exist in the catalog
    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

impl BackendError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::Timeout(_) | BackendError::Conflict(_)
        )
    }
}

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Row not present in the cache
    #[error("Row not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is shutting down and no longer accepts mutations
    #[error("Cache is closed")]
    Closed,

    /// Invalid configuration detected at setup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table has no primary key in the backing store catalog
    #[error("Table '{0}' has no primary key")]
    MissingPrimaryKey(String),

    /// Mutation does not fit the table's schema
    #[error("Schema mismatch for table '{table}': {reason}")]
    SchemaMismatch { table: String, reason: String },

    /// Write-ahead log I/O failure
    #[error("Write-ahead log error at {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Log record could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Backing store failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true if the flush pipeline should retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn log(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Log {
            path: path.into(),
            source,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::MissingPrimaryKey(_)
            | CacheError::SchemaMismatch { .. } => StatusCode::BAD_REQUEST,
            CacheError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Backend(_) => StatusCode::BAD_GATEWAY,
            CacheError::Config(_)
            | CacheError::Log { .. }
            | CacheError::Codec(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
