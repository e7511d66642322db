//! Error types for persistence.
//!
//! Backend failures are fatal by design: silent data loss is worse than a
//! hard stop, so nothing in this crate swallows a storage error.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A tracked background write was cancelled or panicked.
    #[error("pending write lost: {0}")]
    WriteLost(String),
}
