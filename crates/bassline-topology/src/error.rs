//! Error types for the topology model.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating or hashing a Bassline.
#[derive(Debug, Error)]
pub enum Error {
    /// Structural validation failed; the join must be aborted.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// The declared author signature did not verify.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Serialization error while computing the canonical form.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
