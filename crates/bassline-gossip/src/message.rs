//! The peer wire protocol.
//!
//! Newline-delimited JSON objects over a bidirectional socket. Every message
//! carries a `type` tag; the enum is matched exhaustively at the receiver so
//! an unhandled variant is a compile error, not a silent default branch.
//! Malformed payloads are logged and dropped without closing the connection.
//!
//! All messages are fire-and-forget except the `sync-request` /
//! `sync-response` pair.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bassline_topology::{BasslineReference, ContactId, GroupId, PeerId, WireId};

/// One gossip message between two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// Topology identity exchange, sent first on every connection. The
    /// receiver compares against its own canonical hash and warns on
    /// mismatch; resolution is left to higher-level policy.
    BasslineHash {
        /// Sender's peer id, which names the connection.
        peer: PeerId,
        hash: String,
        version: String,
    },

    /// Announcement of what the sender runs locally.
    GroupOwnership {
        groups: Vec<GroupId>,
        contacts: Vec<ContactId>,
    },

    /// A single contact's new content.
    ContentUpdate { contact: ContactId, content: Value },

    /// Reserved extension point for wire-granular reconciliation.
    WireSync {
        wire: WireId,
        from_content: Value,
        to_content: Value,
    },

    /// Wires the sender believes unreachable.
    PartitionDetected { broken_wires: Vec<WireId> },

    /// Wires the sender has observed healing.
    PartitionHealed { healed_wires: Vec<WireId> },

    /// Request for the sender's view of specific contacts.
    SyncRequest { contacts: Vec<ContactId> },

    /// Reply carrying every requested contact the sender holds locally.
    SyncResponse { updates: BTreeMap<ContactId, Value> },

    /// Informational: a group in the topology is itself a nested network.
    SubBasslineAnnounce {
        group: GroupId,
        reference: BasslineReference,
    },
}

impl PeerMessage {
    /// Encode as one newline-terminated JSON frame.
    pub fn to_frame(&self) -> String {
        // The enum serializes infallibly.
        let mut frame = serde_json::to_string(self).unwrap_or_default();
        frame.push('\n');
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_carry_kebab_case_type_tags() {
        let msg = PeerMessage::BasslineHash {
            peer: "p1".into(),
            hash: "abc".into(),
            version: "1.0.0".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "bassline-hash");

        let msg = PeerMessage::GroupOwnership {
            groups: vec!["g1".into()],
            contacts: vec!["c1".into()],
        };
        assert_eq!(serde_json::to_value(&msg).unwrap()["type"], "group-ownership");

        let msg = PeerMessage::PartitionHealed {
            healed_wires: vec!["w1".into()],
        };
        assert_eq!(serde_json::to_value(&msg).unwrap()["type"], "partition-healed");
    }

    #[test]
    fn content_update_round_trips() {
        let msg = PeerMessage::ContentUpdate {
            contact: "c1".into(),
            content: json!({"n": [1, 2, 3]}),
        };
        let frame = msg.to_frame();
        assert!(frame.ends_with('\n'));
        let back: PeerMessage = serde_json::from_str(frame.trim()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_type_tag_fails_to_parse() {
        let result: Result<PeerMessage, _> =
            serde_json::from_str(r#"{"type":"teleport","dest":"moon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn sync_response_preserves_updates_map() {
        let mut updates = BTreeMap::new();
        updates.insert(ContactId::new("a"), json!(1));
        updates.insert(ContactId::new("b"), json!("two"));
        let msg = PeerMessage::SyncResponse { updates };

        let back: PeerMessage = serde_json::from_str(msg.to_frame().trim()).unwrap();
        assert_eq!(back, msg);
    }
}
