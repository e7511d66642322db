//! References to other Basslines and to the endpoints hosting them.

use serde::{Deserialize, Serialize};

use crate::ids::PeerId;

/// Where a participant can be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Dialable address, e.g. `tcp://127.0.0.1:9600`.
    pub url: String,
    /// The peer expected to answer at this address.
    pub peer: PeerId,
    /// Hex-encoded ed25519 public key, if the peer has published one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, peer: impl Into<PeerId>) -> Self {
        Self {
            url: url.into(),
            peer: peer.into(),
            public_key: None,
            capabilities: Vec::new(),
        }
    }

    /// The host:port part of the url, stripped of any scheme prefix.
    pub fn address(&self) -> &str {
        self.url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url)
    }
}

/// A pointer to a Bassline hosted elsewhere (content-addressed or by url).
///
/// The fetch mechanism itself is external; this is just enough identity to
/// hand to a fetcher and to verify what comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasslineReference {
    /// Id of the referenced Bassline.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Expected canonical hash of the referenced Bassline, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl BasslineReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            content_hash: None,
            version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_address_strips_scheme() {
        let ep = Endpoint::new("tcp://127.0.0.1:9600", "peer-a");
        assert_eq!(ep.address(), "127.0.0.1:9600");

        let bare = Endpoint::new("127.0.0.1:9600", "peer-a");
        assert_eq!(bare.address(), "127.0.0.1:9600");
    }
}
