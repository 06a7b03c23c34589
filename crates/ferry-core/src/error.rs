//! Error types for ferry

use thiserror::Error;

/// Core error type for ferry operations
#[derive(Error, Debug)]
pub enum FerryError {
    /// Malformed or incomplete job payload. Surfaced synchronously, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad or tampered credential token. The message never contains the
    /// token or any decrypted material.
    #[error("Credential decrypt error: {0}")]
    CredentialDecrypt(String),

    /// Backend unreachable or auth rejected. Retryable under the bounded policy.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Table missing or has no columns. A configuration problem, not retried.
    #[error("Schema introspection error: {0}")]
    SchemaIntrospection(String),

    /// Single-value conversion failure. Recovered locally by skipping the row.
    #[error("Row conversion error: {0}")]
    RowConversion(String),

    /// Destination rejected a batch. Retried as a whole batch.
    #[error("Batch write error: {0}")]
    BatchWrite(String),

    /// Failure releasing a connection. Logged, never propagated.
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FerryError {
    /// Whether the bounded retry policy applies to this error.
    ///
    /// Connection failures, batch write rejections and per-call timeouts are
    /// transient; everything else either indicates a configuration problem
    /// or is handled locally (row skip, cleanup logging).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FerryError::Connection(_) | FerryError::BatchWrite(_) | FerryError::Timeout(_)
        )
    }
}

/// Result type alias for ferry operations
pub type Result<T> = std::result::Result<T, FerryError>;
