//! Typed identifiers.
//!
//! Groups, contacts, wires and peers all travel as strings on the wire, but
//! inside the process mixing them up should be a type error, not a runtime
//! surprise. Each id is a thin newtype over `String` that serializes
//! transparently.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty (always invalid).
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a group (a named region of the topology).
    GroupId
);

string_id!(
    /// Identifier of a contact (a single reactive cell).
    ContactId
);

string_id!(
    /// Identifier of a wire (a propagation link between two contacts).
    WireId
);

string_id!(
    /// Identifier of a peer participating in a network.
    PeerId
);

impl PeerId {
    /// Derive a peer id from an ed25519 public key, BLAKE3-hashed.
    pub fn from_public_key(pubkey: &[u8]) -> Self {
        let hash = blake3::hash(pubkey);
        Self(format!("b3/{}", hex::encode(hash.as_bytes())))
    }

    /// Namespace a child peer id under this one (used by nested networks).
    pub fn namespaced(&self, child: &GroupId) -> Self {
        Self(format!("{}/{}", self.0, child.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let id = ContactId::new("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");
        let back: ContactId = serde_json::from_str("\"c1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn peer_id_from_public_key_is_stable() {
        let a = PeerId::from_public_key(b"key material");
        let b = PeerId::from_public_key(b"key material");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("b3/"));
    }

    #[test]
    fn namespaced_peer_id() {
        let parent = PeerId::new("node-1");
        let child = parent.namespaced(&GroupId::new("inner"));
        assert_eq!(child.as_str(), "node-1/inner");
    }
}
