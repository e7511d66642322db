//! Gossip-learned ownership and wire affinity.
//!
//! The ownership map is eventually consistent and may be stale or
//! incomplete; it records which peers have *announced* holding a contact,
//! not who authoritatively does.

use std::collections::{HashMap, HashSet};

use bassline_topology::{ContactId, PeerId, Topology};

/// contact → peers known (via gossip) to hold it.
#[derive(Debug, Default)]
pub struct OwnershipTracker {
    owners: HashMap<ContactId, HashSet<PeerId>>,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a peer's ownership announcement.
    pub fn announce(&mut self, peer: &PeerId, contacts: impl IntoIterator<Item = ContactId>) {
        for contact in contacts {
            self.owners.entry(contact).or_default().insert(peer.clone());
        }
    }

    /// Forget everything a peer announced (on disconnect the knowledge is
    /// kept as stale hints; this is for explicit retraction only).
    pub fn retract(&mut self, peer: &PeerId) {
        for owners in self.owners.values_mut() {
            owners.remove(peer);
        }
        self.owners.retain(|_, owners| !owners.is_empty());
    }

    /// Peers known to hold a contact.
    pub fn owners(&self, contact: &ContactId) -> impl Iterator<Item = &PeerId> {
        self.owners.get(contact).into_iter().flatten()
    }

    /// Whether a contact is reachable right now: held locally, or held by at
    /// least one of the currently connected peers.
    pub fn is_reachable(
        &self,
        contact: &ContactId,
        local_contacts: &HashSet<ContactId>,
        live_peers: &HashSet<PeerId>,
    ) -> bool {
        local_contacts.contains(contact)
            || self.owners(contact).any(|peer| live_peers.contains(peer))
    }
}

/// Wire affinity between this node and one peer: the sum of priorities over
/// wires where we can reach one endpoint locally and the peer has announced
/// the other. The connectivity test ignores direction, so the score is
/// symmetric by construction.
pub fn wire_affinity(
    topology: &Topology,
    local_contacts: &HashSet<ContactId>,
    peer_contacts: &HashSet<ContactId>,
) -> u32 {
    topology
        .wires
        .values()
        .filter(|wire| {
            (local_contacts.contains(&wire.from) && peer_contacts.contains(&wire.to))
                || (local_contacts.contains(&wire.to) && peer_contacts.contains(&wire.from))
        })
        .map(|wire| wire.priority)
        .sum()
}
