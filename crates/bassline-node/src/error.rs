//! Error types for the node composer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topology error: {0}")]
    Topology(#[from] bassline_topology::Error),

    #[error("storage error: {0}")]
    Storage(#[from] bassline_store::Error),

    #[error("gossip error: {0}")]
    Gossip(#[from] bassline_gossip::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("resource limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("sub-bassline fetch failed: {0}")]
    Fetch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
