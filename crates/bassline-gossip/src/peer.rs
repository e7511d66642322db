//! Live peer bookkeeping.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use bassline_topology::{ContactId, Endpoint, GroupId, PeerId};

use crate::message::PeerMessage;

/// Default reliability score. Reserved for future decay-based scoring; every
/// peer currently starts and stays here.
pub const DEFAULT_RELIABILITY: f64 = 1.0;

/// A connected participant: identity, what it has announced it owns, and the
/// outbound half of its connection.
#[derive(Debug)]
pub struct BasslinePeer {
    pub id: PeerId,
    /// Where we dialed the peer, when we were the dialer.
    pub endpoint: Option<Endpoint>,
    /// Groups the peer announced it runs locally.
    pub owned_groups: HashSet<GroupId>,
    /// Contacts inside those groups.
    pub owned_contacts: HashSet<ContactId>,
    /// Sum of wire priorities connecting our contacts to theirs.
    pub wire_affinity: u32,
    /// Dial round-trip estimate; `None` on accepted connections.
    pub latency: Option<Duration>,
    pub last_seen: Instant,
    pub reliability: f64,
    /// Outbound frames; dropped (cancelling pending sends) on disconnect.
    pub sender: mpsc::UnboundedSender<PeerMessage>,
}

impl BasslinePeer {
    pub fn new(id: PeerId, sender: mpsc::UnboundedSender<PeerMessage>) -> Self {
        Self {
            id,
            endpoint: None,
            owned_groups: HashSet::new(),
            owned_contacts: HashSet::new(),
            wire_affinity: 0,
            latency: None,
            last_seen: Instant::now(),
            reliability: DEFAULT_RELIABILITY,
            sender,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Queue a frame for this peer; returns false when the connection's
    /// writer is already gone.
    pub fn send(&self, message: PeerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}
