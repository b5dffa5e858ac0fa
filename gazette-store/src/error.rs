//! Error types for the gazette-store crate.
//!
//! Every store operation returns [`StoreError`]. Callers that need to react
//! to a specific failure (the subscription manager recovering from a
//! duplicate-creation race, for example) match on the variant rather than
//! on the message.

use gazette_common::SubscriberId;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    ///
    /// Raised when two callers race to create a subscriber with the same
    /// email; the loser sees this error.
    #[error("Duplicate key: a subscriber with email {0} already exists")]
    DuplicateKey(String),

    /// An update referenced a subscriber the store does not know about.
    #[error("Subscriber not found: {0}")]
    NotFound(SubscriberId),

    /// The underlying database reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database was written by a newer schema than this binary knows.
    #[error("Database schema version {found} is newer than supported {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// Data read back from the store failed validation.
    #[error("Invalid persisted data: {0}")]
    InvalidData(String),

    /// The store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (worker thread failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns `true` if a uniqueness constraint rejected the write.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Store worker failed: {e}"))
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
