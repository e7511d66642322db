//! Bassline Gossip - the peer-to-peer exchange layer.
//!
//! Peers speak newline-delimited JSON over TCP. Each connection is a pair
//! of tasks: a reader that parses frames and applies them in receipt order,
//! and a writer draining an unbounded queue. On top of the wire sit the
//! ownership map (who runs which contacts), wire affinity scoring, and
//! partition detection and healing. Effects surface as [`GossipEvent`]s.

pub mod error;
pub mod message;
pub mod ownership;
pub mod partition;
pub mod peer;
pub mod service;

pub use error::{Error, Result};
pub use message::PeerMessage;
pub use ownership::{wire_affinity, OwnershipTracker};
pub use partition::PartitionTracker;
pub use peer::{BasslinePeer, DEFAULT_RELIABILITY};
pub use service::{GossipConfig, GossipEvent, GossipService, GossipState};
