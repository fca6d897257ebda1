//! Error types for hn-dl
//!
//! Two error families are scoped to a single item and never abort a run:
//! - [`FetchError`]: the item could not be retrieved or decoded
//! - [`WriteError`]: the item could not be persisted
//!
//! Everything else (configuration, database bootstrap, I/O) surfaces through [`Error`].

use crate::types::ItemId;
use thiserror::Error;

/// Result type alias for hn-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hn-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "run.batch_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Fetching an item from the upstream API failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Persisting an item failed
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a single item fetch (client setup, max item lookup)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or upgrade the schema
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure to retrieve a single item from the upstream API
///
/// Every variant carries the requested ID so the failure can be logged and the ID
/// skipped without affecting the rest of the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (connect failure, timeout, reset)
    #[error("request for item {id} failed: {source}")]
    Transport {
        /// Requested item ID
        id: ItemId,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status code
    #[error("item {id} returned HTTP status {status}")]
    Status {
        /// Requested item ID
        id: ItemId,
        /// HTTP status code
        status: u16,
    },

    /// The API answered `null` or an empty body (the item does not exist)
    #[error("item {id} returned an empty document")]
    Empty {
        /// Requested item ID
        id: ItemId,
    },

    /// The body was not a valid item document
    #[error("item {id} could not be decoded: {source}")]
    Decode {
        /// Requested item ID
        id: ItemId,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The document describes a different item than the one requested
    #[error("requested item {id} but received item {received}")]
    IdMismatch {
        /// Requested item ID
        id: ItemId,
        /// ID found in the returned document
        received: ItemId,
    },
}

impl FetchError {
    /// The item ID this failure belongs to
    pub fn id(&self) -> ItemId {
        match self {
            FetchError::Transport { id, .. }
            | FetchError::Status { id, .. }
            | FetchError::Empty { id }
            | FetchError::Decode { id, .. }
            | FetchError::IdMismatch { id, .. } => *id,
        }
    }

    /// True when the upstream reports the item as absent rather than failing to serve it
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            FetchError::Empty { .. } | FetchError::Status { status: 404, .. }
        )
    }
}

/// Failure to persist a single item
#[derive(Debug, Error)]
pub enum WriteError {
    /// The `items` row could not be inserted; no kid rows were attempted
    #[error("failed to insert item {id}: {source}")]
    Item {
        /// Item being written
        id: ItemId,
        /// Underlying database error
        #[source]
        source: sqlx::Error,
    },

    /// The `items` row was written but some kid rows were not
    #[error("item {id} stored but its kids could not be inserted: {source}")]
    Kids {
        /// Item being written
        id: ItemId,
        /// Underlying database error
        #[source]
        source: sqlx::Error,
    },

    /// The upstream reported the item as nonexistent but that could not be recorded
    #[error("failed to record item {id} as missing: {source}")]
    Missing {
        /// Item that was not found upstream
        id: ItemId,
        /// Underlying database error
        #[source]
        source: sqlx::Error,
    },

    /// Beginning or committing a batch transaction failed
    #[error("failed to {operation} write transaction: {source}")]
    Transaction {
        /// The transaction step that failed ("begin", "commit")
        operation: &'static str,
        /// Underlying database error
        #[source]
        source: sqlx::Error,
    },
}

impl WriteError {
    /// The item ID this failure belongs to, if it is item-scoped
    pub fn id(&self) -> Option<ItemId> {
        match self {
            WriteError::Item { id, .. }
            | WriteError::Kids { id, .. }
            | WriteError::Missing { id, .. } => Some(*id),
            WriteError::Transaction { .. } => None,
        }
    }
}
