//! Node-level events for outer layers (CLI, UI, tests).
//!
//! Published on a `tokio::sync::broadcast` channel; subscribers that fall
//! behind lose the oldest events, which is acceptable for observers.

use serde_json::Value;

use bassline_topology::{ContactId, GroupId, PeerId, WireId};

#[derive(Debug, Clone)]
pub enum NodeEvent {
    BasslineLoaded { id: String, version: String },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    ContentUpdated { contact: ContactId, content: Value },
    WireBroken(WireId),
    WireHealed(WireId),
    PartitionDetected { broken_wires: Vec<WireId> },
    PartitionHealed { healed_wires: Vec<WireId> },
    SubBasslineStarted { group: GroupId, bassline: String },
    /// First time local knowledge reaches the given share of all contacts.
    ConvergenceAchieved { percent: f64 },
}
