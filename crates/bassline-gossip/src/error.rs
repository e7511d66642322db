//! Error types for the gossip layer.
//!
//! Peer errors are non-fatal by design: a failing peer is logged and removed
//! while the node keeps operating with whoever is left.

use thiserror::Error;

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in peer connections and gossip handling.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to open, accept or keep a peer connection.
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// Protocol-level problem on an otherwise healthy connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
