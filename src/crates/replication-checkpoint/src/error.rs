//! Error types for checkpoint operations

use crate::store::Endpoint;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors reported by a [`DocumentStore`](crate::store::DocumentStore) adapter.
///
/// A missing document on read is not an error; adapters return `Ok(None)`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The put carried a stale (or missing) revision for an existing document
    #[error("Document update conflict: {0}")]
    Conflict(String),

    /// The put carried a revision but the document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The endpoint refuses writes (read-only database, missing permissions)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The endpoint could not be reached or timed out
    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),

    /// Stored bytes are not a valid checkpoint document
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other adapter failure
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Whether the failure is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Whether the endpoint refused the write because it is read-only
    pub fn is_forbidden(&self) -> bool {
        matches!(self, StoreError::Forbidden(_))
    }
}

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Reading or writing one endpoint's checkpoint document failed
    #[error("{endpoint} checkpoint failed: {source}")]
    Endpoint {
        endpoint: Endpoint,
        #[source]
        source: StoreError,
    },

    /// Every conflict retry lost the race against a concurrent writer
    #[error("{endpoint} checkpoint still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { endpoint: Endpoint, attempts: u32 },

    /// The checkpoint id cannot name a document
    #[error("Invalid checkpoint id: {0}")]
    InvalidId(String),

    /// Options could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub(crate) fn endpoint(endpoint: Endpoint, source: StoreError) -> Self {
        CheckpointError::Endpoint { endpoint, source }
    }
}

impl From<toml::de::Error> for CheckpointError {
    fn from(err: toml::de::Error) -> Self {
        CheckpointError::Config(err.to_string())
    }
}
