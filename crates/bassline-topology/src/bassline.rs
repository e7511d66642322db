//! The Bassline: a canonical, versioned, hashable network description.
//!
//! Two participants holding the same id + version must compute the same
//! canonical hash. Divergence is a protocol error to be surfaced, never
//! silently resolved.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::GroupId;
use crate::reference::{BasslineReference, Endpoint};
use crate::topology::{ContactSpec, GroupSpec, Topology, WireSpec};

/// Author metadata and the (optional) signature over the canonical hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasslineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Hex-encoded ed25519 public key of the author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_public_key: Option<String>,
    /// Hex-encoded ed25519 signature over the canonical hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<String>,
}

/// One complete network description.
///
/// A Bassline is loaded once per node and is immutable for that node's
/// lifetime; topology changes require a new version and a fresh join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bassline {
    pub id: String,
    pub version: String,
    pub topology: Topology,
    /// Which endpoint is expected to host each group.
    #[serde(default)]
    pub endpoints: BTreeMap<GroupId, Endpoint>,
    /// Nested-network references, keyed by the group they implement.
    #[serde(default)]
    pub references: BTreeMap<GroupId, BasslineReference>,
    #[serde(default)]
    pub metadata: BasslineMetadata,
}

/// The exact shape fed to the hash function. Collections become key-sorted
/// arrays so that map representation never leaks into the digest.
#[derive(Serialize)]
struct CanonicalForm<'a> {
    id: &'a str,
    version: &'a str,
    groups: Vec<&'a GroupSpec>,
    contacts: Vec<&'a ContactSpec>,
    wires: Vec<&'a WireSpec>,
}

impl Bassline {
    pub fn new(id: impl Into<String>, version: impl Into<String>, topology: Topology) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            topology,
            endpoints: BTreeMap::new(),
            references: BTreeMap::new(),
            metadata: BasslineMetadata::default(),
        }
    }

    /// BLAKE3 digest of the canonical serialization, hex-encoded.
    ///
    /// Deterministic under reordering of the keyed collections: the canonical
    /// form sorts groups, contacts and wires by key before serializing.
    pub fn canonical_hash(&self) -> String {
        let form = CanonicalForm {
            id: &self.id,
            version: &self.version,
            groups: self.topology.groups.values().collect(),
            contacts: self.topology.contacts.values().collect(),
            wires: self.topology.wires.values().collect(),
        };
        // Serializing plain structs and vecs cannot fail.
        let bytes = serde_json::to_vec(&form).unwrap_or_default();
        hex::encode(blake3::hash(&bytes).as_bytes())
    }

    /// Structural validation. Fails the join with `InvalidTopology`; never
    /// repairs anything.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidTopology("bassline id is empty".into()));
        }
        if self.topology.is_empty() {
            return Err(Error::InvalidTopology("topology is empty".into()));
        }

        for contact in self.topology.contacts.values() {
            if !self.topology.groups.contains_key(&contact.group) {
                return Err(Error::InvalidTopology(format!(
                    "contact {} references missing group {}",
                    contact.id, contact.group
                )));
            }
        }

        for wire in self.topology.wires.values() {
            for end in [&wire.from, &wire.to] {
                if !self.topology.contacts.contains_key(end) {
                    return Err(Error::InvalidTopology(format!(
                        "wire {} references missing contact {}",
                        wire.id, end
                    )));
                }
            }
            if !self.topology.groups.contains_key(&wire.group) {
                return Err(Error::InvalidTopology(format!(
                    "wire {} references missing group {}",
                    wire.id, wire.group
                )));
            }
        }

        for group in self.topology.groups.values() {
            if let Some(parent) = &group.parent {
                if !self.topology.groups.contains_key(parent) {
                    return Err(Error::InvalidTopology(format!(
                        "group {} references missing parent {}",
                        group.id, parent
                    )));
                }
            }
            for boundary in group.inputs.iter().chain(group.outputs.iter()) {
                match self.topology.contacts.get(boundary) {
                    None => {
                        return Err(Error::InvalidTopology(format!(
                            "group {} boundary references missing contact {}",
                            group.id, boundary
                        )));
                    }
                    Some(contact) if contact.group != group.id => {
                        return Err(Error::InvalidTopology(format!(
                            "group {} boundary contact {} belongs to group {}",
                            group.id, boundary, contact.group
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        for group in self.references.keys().chain(self.endpoints.keys()) {
            if !self.topology.groups.contains_key(group) {
                return Err(Error::InvalidTopology(format!(
                    "endpoint/reference entry for missing group {group}"
                )));
            }
        }

        Ok(())
    }

    /// Verify the author signature over the canonical hash.
    ///
    /// A declared hook rather than an enforced guarantee: when either the
    /// public key or the signature is absent nothing is checked. When both
    /// are present and the signature does not verify, the join must abort.
    pub fn verify_signature(&self) -> Result<()> {
        let (Some(key_hex), Some(sig_hex)) = (
            self.metadata.author_public_key.as_deref(),
            self.metadata.signature.as_deref(),
        ) else {
            return Ok(());
        };

        let key_bytes: [u8; 32] = hex::decode(key_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::SignatureVerification("malformed public key".into()))?;
        let sig_bytes: [u8; 64] = hex::decode(sig_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::SignatureVerification("malformed signature".into()))?;

        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| Error::SignatureVerification(e.to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(self.canonical_hash().as_bytes(), &signature)
            .map_err(|e| Error::SignatureVerification(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Boundary, WireKind};

    fn sample() -> Bassline {
        let mut topology = Topology::default();
        topology
            .groups
            .insert("g1".into(), GroupSpec::container("g1", "first"));
        topology
            .groups
            .insert("g2".into(), GroupSpec::container("g2", "second"));
        topology
            .contacts
            .insert("a".into(), ContactSpec::new("a", "g1"));
        topology
            .contacts
            .insert("b".into(), ContactSpec::new("b", "g2").boundary(Boundary::Input));
        topology.wires.insert(
            "w1".into(),
            WireSpec {
                id: "w1".into(),
                from: "a".into(),
                to: "b".into(),
                kind: WireKind::Bidirectional,
                group: "g1".into(),
                priority: 1,
                required: false,
            },
        );
        Bassline::new("net", "1.0.0", topology)
    }

    #[test]
    fn canonical_hash_is_deterministic() {
        let bassline = sample();
        assert_eq!(bassline.canonical_hash(), bassline.canonical_hash());
    }

    #[test]
    fn canonical_hash_survives_reordering() {
        let bassline = sample();
        // Rebuild the collections in reverse insertion order; BTreeMap
        // re-sorts, so the digest must not move.
        let mut reordered = Bassline::new("net", "1.0.0", Topology::default());
        for (k, v) in bassline.topology.wires.iter().rev() {
            reordered.topology.wires.insert(k.clone(), v.clone());
        }
        for (k, v) in bassline.topology.contacts.iter().rev() {
            reordered.topology.contacts.insert(k.clone(), v.clone());
        }
        for (k, v) in bassline.topology.groups.iter().rev() {
            reordered.topology.groups.insert(k.clone(), v.clone());
        }
        assert_eq!(bassline.canonical_hash(), reordered.canonical_hash());
    }

    #[test]
    fn canonical_hash_sees_structural_change() {
        let bassline = sample();
        let mut grown = bassline.clone();
        grown
            .topology
            .contacts
            .insert("c".into(), ContactSpec::new("c", "g1"));
        assert_ne!(bassline.canonical_hash(), grown.canonical_hash());
    }

    #[test]
    fn validation_accepts_sample() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validation_rejects_empty_id() {
        let mut bassline = sample();
        bassline.id.clear();
        assert!(matches!(
            bassline.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn validation_rejects_empty_topology() {
        let bassline = Bassline::new("net", "1.0.0", Topology::default());
        assert!(matches!(
            bassline.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn validation_rejects_dangling_wire_endpoint() {
        let mut bassline = sample();
        bassline.topology.contacts.remove(&"b".into());
        // Also drop the boundary listing so the wire is the first failure.
        assert!(matches!(
            bassline.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn validation_rejects_boundary_in_wrong_group() {
        let mut bassline = sample();
        let g1 = bassline.topology.groups.get_mut(&"g1".into()).unwrap();
        // "b" lives in g2, so listing it on g1's boundary is invalid.
        g1.inputs.push("b".into());
        assert!(matches!(
            bassline.validate(),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn unsigned_bassline_passes_signature_hook() {
        assert!(sample().verify_signature().is_ok());
    }

    #[test]
    fn signed_bassline_roundtrip() {
        use ed25519_dalek::{Signer, SigningKey};

        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut bassline = sample();
        bassline.metadata.author_public_key =
            Some(hex::encode(key.verifying_key().as_bytes()));

        let signature = key.sign(bassline.canonical_hash().as_bytes());
        bassline.metadata.signature = Some(hex::encode(signature.to_bytes()));
        assert!(bassline.verify_signature().is_ok());

        // Tampering with the topology invalidates the signature.
        bassline
            .topology
            .contacts
            .insert("x".into(), ContactSpec::new("x", "g1"));
        assert!(matches!(
            bassline.verify_signature(),
            Err(Error::SignatureVerification(_))
        ));
    }
}
