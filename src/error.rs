//! Error types for the query-resolution core

use thiserror::Error;

/// Main error type covering schema, filter, upstream, and backend failures
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("schema already defined: {name}")]
    DuplicateSchema { name: String },

    #[error("unknown schema: {name}")]
    UnknownSchema { name: String },

    #[error("schema violation: {message}")]
    SchemaViolation { message: String },

    #[error("unsupported backend kind: {kind}")]
    UnsupportedBackend { kind: String },

    #[error("filter references unknown or non-filterable field: {field}")]
    InvalidFilterField { field: String },

    #[error("upstream timeout during {operation} after {waited_ms}ms")]
    UpstreamTimeout { operation: String, waited_ms: u64 },

    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Whether a caller-configured retry policy may re-issue the operation.
    /// Schema and filter errors are deterministic and never retryable;
    /// timeouts are surfaced as-is so the caller can decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::UpstreamUnavailable { .. } | QueryError::BackendUnavailable { .. }
        )
    }

    pub(crate) fn schema_violation(message: impl Into<String>) -> Self {
        QueryError::SchemaViolation { message: message.into() }
    }

    pub(crate) fn backend_unavailable(message: impl Into<String>) -> Self {
        QueryError::BackendUnavailable { message: message.into() }
    }
}

/// Result type alias for core operations
pub type EngineResult<T> = Result<T, QueryError>;
