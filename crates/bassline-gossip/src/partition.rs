//! Partition detection and healing.
//!
//! A wire is broken when a peer announces it, or when we self-detect that
//! exactly one of its endpoints is reachable through the current peer set.
//! Healing runs whenever a new peer finishes its ownership announcement: a
//! fresh bridge often carries many stale values, so a heal triggers an
//! aggressive re-sync of everything this node is missing, not just the
//! healed wire's endpoints.

use std::collections::HashSet;

use bassline_topology::{ContactId, PeerId, Topology, WireId};

use crate::ownership::OwnershipTracker;

/// Tracks which wires this node currently believes unreachable.
#[derive(Debug, Default)]
pub struct PartitionTracker {
    broken: HashSet<WireId>,
}

impl PartitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken_wires(&self) -> impl Iterator<Item = &WireId> {
        self.broken.iter()
    }

    pub fn is_broken(&self, wire: &WireId) -> bool {
        self.broken.contains(wire)
    }

    /// Union in wires another peer reported broken. Returns the ones that
    /// are news to us.
    pub fn merge_announced(&mut self, wires: impl IntoIterator<Item = WireId>) -> Vec<WireId> {
        wires
            .into_iter()
            .filter(|w| self.broken.insert(w.clone()))
            .collect()
    }

    /// Drop wires another peer observed healing.
    pub fn merge_healed(&mut self, wires: impl IntoIterator<Item = WireId>) -> Vec<WireId> {
        wires
            .into_iter()
            .filter(|w| self.broken.remove(w))
            .collect()
    }

    /// Self-detection sweep: a wire breaks when one endpoint is reachable
    /// and the other is not. Wires with both endpoints unreachable are a
    /// total outage rather than a partition and are left alone. Returns the
    /// newly broken wires.
    pub fn detect_broken(
        &mut self,
        topology: &Topology,
        local_contacts: &HashSet<ContactId>,
        ownership: &OwnershipTracker,
        live_peers: &HashSet<PeerId>,
    ) -> Vec<WireId> {
        let mut newly_broken = Vec::new();
        for wire in topology.wires.values() {
            if self.broken.contains(&wire.id) {
                continue;
            }
            let from_ok = ownership.is_reachable(&wire.from, local_contacts, live_peers);
            let to_ok = ownership.is_reachable(&wire.to, local_contacts, live_peers);
            if from_ok != to_ok {
                self.broken.insert(wire.id.clone());
                newly_broken.push(wire.id.clone());
            }
        }
        newly_broken
    }

    /// Healing check: every broken wire whose endpoint owner sets are both
    /// reachable across the current peer set plus self is healed. Returns
    /// the healed wires, already removed from the broken set.
    pub fn check_healed(
        &mut self,
        topology: &Topology,
        local_contacts: &HashSet<ContactId>,
        ownership: &OwnershipTracker,
        live_peers: &HashSet<PeerId>,
    ) -> Vec<WireId> {
        let healed: Vec<WireId> = self
            .broken
            .iter()
            .filter(|id| {
                let Some(wire) = topology.wires.get(*id) else {
                    // Wire no longer in the topology; treat as healed.
                    return true;
                };
                ownership.is_reachable(&wire.from, local_contacts, live_peers)
                    && ownership.is_reachable(&wire.to, local_contacts, live_peers)
            })
            .cloned()
            .collect();
        for wire in &healed {
            self.broken.remove(wire);
        }
        healed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bassline_topology::{ContactSpec, GroupSpec, WireKind, WireSpec};

    fn two_ended_topology() -> Topology {
        let mut topology = Topology::default();
        topology
            .groups
            .insert("g".into(), GroupSpec::container("g", "g"));
        for c in ["mine", "theirs"] {
            topology
                .contacts
                .insert(c.into(), ContactSpec::new(c, "g"));
        }
        topology.wires.insert(
            "w1".into(),
            WireSpec {
                id: "w1".into(),
                from: "mine".into(),
                to: "theirs".into(),
                kind: WireKind::Bidirectional,
                group: "g".into(),
                priority: 1,
                required: true,
            },
        );
        topology
    }

    #[test]
    fn detects_half_reachable_wire() {
        let topology = two_ended_topology();
        let local = HashSet::from([ContactId::new("mine")]);
        let ownership = OwnershipTracker::new();
        let live = HashSet::new();

        let mut partitions = PartitionTracker::new();
        let broken = partitions.detect_broken(&topology, &local, &ownership, &live);
        assert_eq!(broken, vec![WireId::new("w1")]);

        // A second sweep reports nothing new.
        assert!(partitions
            .detect_broken(&topology, &local, &ownership, &live)
            .is_empty());
    }

    #[test]
    fn heals_when_bridge_peer_appears() {
        let topology = two_ended_topology();
        let local = HashSet::from([ContactId::new("mine")]);
        let mut ownership = OwnershipTracker::new();
        let mut live = HashSet::new();

        let mut partitions = PartitionTracker::new();
        partitions.detect_broken(&topology, &local, &ownership, &live);
        assert!(partitions.is_broken(&"w1".into()));

        // A new peer announces ownership of the far endpoint.
        ownership.announce(&"bridge".into(), [ContactId::new("theirs")]);
        live.insert(PeerId::new("bridge"));

        let healed = partitions.check_healed(&topology, &local, &ownership, &live);
        assert_eq!(healed, vec![WireId::new("w1")]);
        assert!(!partitions.is_broken(&"w1".into()));

        // Exactly once: a repeat check heals nothing further.
        assert!(partitions
            .check_healed(&topology, &local, &ownership, &live)
            .is_empty());
    }

    #[test]
    fn announced_wires_merge_once() {
        let mut partitions = PartitionTracker::new();
        let news = partitions.merge_announced([WireId::new("w1"), WireId::new("w2")]);
        assert_eq!(news.len(), 2);
        let news = partitions.merge_announced([WireId::new("w2")]);
        assert!(news.is_empty());

        let healed = partitions.merge_healed([WireId::new("w1"), WireId::new("w9")]);
        assert_eq!(healed, vec![WireId::new("w1")]);
    }

    #[test]
    fn fully_unreachable_wire_is_not_a_partition() {
        let topology = two_ended_topology();
        let local = HashSet::new();
        let ownership = OwnershipTracker::new();
        let live = HashSet::new();

        let mut partitions = PartitionTracker::new();
        assert!(partitions
            .detect_broken(&topology, &local, &ownership, &live)
            .is_empty());
    }
}
