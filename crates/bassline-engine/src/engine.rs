//! The local propagation engine.
//!
//! One engine per process holds the live contact values for the whole
//! topology, propagates value changes along wires breadth-first and
//! re-evaluates primitive groups until the state settles. All mutation is
//! synchronous: a single [`PropagationEngine::schedule_update`] runs to a
//! local fixed point before returning, so callers see it as atomic.
//!
//! Derived updates (neighbors reached by propagation, primitive outputs) are
//! appended to an explicit change queue that callers drain; the direct update
//! itself is reported through the return value, since the caller already
//! knows what it wrote.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use bassline_topology::{
    Boundary, ContactId, ContactSpec, GroupId, GroupRole, GroupSpec, Topology, WireId, WireKind,
    WireSpec,
};

use crate::blend;
use crate::primitives;
use crate::snapshot::{ContactState, GroupState, NetworkState};

/// Bound on alternating propagate/execute rounds before the engine gives up
/// on settling and logs the groups still changing.
pub const MAX_SETTLE_ROUNDS: usize = 8;

/// A derived content change, queued for batched external notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub contact: ContactId,
    pub group: GroupId,
    pub content: Value,
}

/// Partial contact description handed to [`PropagationEngine::add_contact`].
#[derive(Debug, Clone, Default)]
pub struct ContactDraft {
    pub id: Option<ContactId>,
    pub name: Option<String>,
    pub blend_mode: Option<bassline_topology::BlendMode>,
    pub boundary: Option<Boundary>,
    pub schema: Option<Value>,
    pub content: Option<Value>,
}

/// The reactive runtime every participant runs locally.
#[derive(Debug, Default)]
pub struct PropagationEngine {
    groups: HashMap<GroupId, GroupSpec>,
    contacts: HashMap<ContactId, ContactState>,
    wires: HashMap<WireId, WireSpec>,
    changes: Vec<ChangeRecord>,
    next_id: u64,
}

impl PropagationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an engine from a topology; every contact starts at null unless
    /// later hydrated from storage.
    pub fn from_topology(topology: &Topology) -> Self {
        let mut engine = Self::new();
        for group in topology.groups.values() {
            engine.register_group(group.clone());
        }
        for contact in topology.contacts.values() {
            engine.contacts.insert(
                contact.id.clone(),
                ContactState {
                    spec: contact.clone(),
                    content: Value::Null,
                },
            );
        }
        for wire in topology.wires.values() {
            engine.wires.insert(wire.id.clone(), wire.clone());
        }
        engine
    }

    // --- Topology operations ---

    /// Insert a group. No side effects beyond making the group available.
    pub fn register_group(&mut self, spec: GroupSpec) {
        self.groups.insert(spec.id.clone(), spec);
    }

    /// Add a contact to a group, assigning an id if the draft carries none.
    ///
    /// Defaults: null content, accept-last blend. Boundary contacts are
    /// appended to the owning group's ordered input/output list.
    pub fn add_contact(&mut self, group: &GroupId, draft: ContactDraft) -> Option<ContactId> {
        if !self.groups.contains_key(group) {
            return None;
        }

        let id = draft.id.unwrap_or_else(|| {
            self.next_id += 1;
            ContactId::new(format!("contact-{}", self.next_id))
        });

        let spec = ContactSpec {
            id: id.clone(),
            group: group.clone(),
            name: draft.name,
            blend_mode: draft.blend_mode.unwrap_or_default(),
            boundary: draft.boundary,
            schema: draft.schema,
        };

        if let Some(owner) = self.groups.get_mut(group) {
            match spec.boundary {
                Some(Boundary::Input) => owner.inputs.push(id.clone()),
                Some(Boundary::Output) => owner.outputs.push(id.clone()),
                None => {}
            }
        }

        self.contacts.insert(
            id.clone(),
            ContactState {
                spec,
                content: draft.content.unwrap_or(Value::Null),
            },
        );
        Some(id)
    }

    /// Create a wire between two existing contacts and propagate from `from`.
    ///
    /// Group attribution: a wire within one group belongs to that group; a
    /// boundary-crossing wire belongs to the `to` side when `from` is a
    /// boundary contact, otherwise to the `from` side.
    pub fn connect(&mut self, from: &ContactId, to: &ContactId, kind: WireKind) -> Option<WireId> {
        let (from_group, from_boundary) = {
            let c = self.contacts.get(from)?;
            (c.spec.group.clone(), c.spec.is_boundary())
        };
        let to_group = self.contacts.get(to)?.spec.group.clone();

        let group = if from_group == to_group {
            from_group
        } else if from_boundary {
            to_group
        } else {
            from_group
        };

        self.next_id += 1;
        let id = WireId::new(format!("wire-{}", self.next_id));
        self.wires.insert(
            id.clone(),
            WireSpec {
                id: id.clone(),
                from: from.clone(),
                to: to.clone(),
                kind,
                group,
                priority: 1,
                required: false,
            },
        );

        self.propagate_from(from);
        self.settle_primitives();
        Some(id)
    }

    // --- Content operations ---

    /// Update a contact's content, propagate, and settle primitives.
    ///
    /// Returns false when the contact is unknown or the blend-resolved value
    /// equals what the contact already holds (the idempotent no-op case).
    pub fn schedule_update(&mut self, contact: &ContactId, content: Value) -> bool {
        if !self.apply_value(contact, &content, false) {
            return false;
        }
        self.propagate_from(contact);
        self.settle_primitives();
        true
    }

    /// Write a value through the contact's blend mode. Appends a change
    /// record when `record` is set and the stored content actually moved.
    fn apply_value(&mut self, contact: &ContactId, incoming: &Value, record: bool) -> bool {
        let Some(state) = self.contacts.get_mut(contact) else {
            // Benign race during topology churn; not an error.
            return false;
        };
        let resolved = blend::resolve(state.spec.blend_mode, &state.content, incoming);
        if resolved == state.content {
            return false;
        }
        state.content = resolved.clone();
        if record {
            self.changes.push(ChangeRecord {
                contact: contact.clone(),
                group: state.spec.group.clone(),
                content: resolved,
            });
        }
        true
    }

    /// Breadth-first propagation from an already-updated contact.
    ///
    /// Follows every wire where the frontier contact is the `from` endpoint,
    /// plus bidirectional wires where it is the `to` endpoint. Neighbors are
    /// visited at most once; only neighbors whose value actually moved are
    /// enqueued further.
    fn propagate_from(&mut self, start: &ContactId) {
        let mut visited: HashSet<ContactId> = HashSet::from([start.clone()]);
        let mut frontier: VecDeque<ContactId> = VecDeque::from([start.clone()]);

        while let Some(current) = frontier.pop_front() {
            let Some(content) = self.contacts.get(&current).map(|c| c.content.clone()) else {
                continue;
            };

            let neighbors: Vec<ContactId> = self
                .wires
                .values()
                .filter_map(|wire| {
                    if wire.from == current {
                        Some(wire.to.clone())
                    } else if wire.to == current && wire.kind == WireKind::Bidirectional {
                        Some(wire.from.clone())
                    } else {
                        None
                    }
                })
                .collect();

            for neighbor in neighbors {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                if self.apply_value(&neighbor, &content, true) {
                    frontier.push_back(neighbor);
                }
            }
        }
    }

    /// Re-evaluate every primitive group until nothing changes, bounded by
    /// [`MAX_SETTLE_ROUNDS`].
    fn settle_primitives(&mut self) {
        let primitive_groups: Vec<(GroupId, String)> = self
            .groups
            .values()
            .filter_map(|g| match &g.role {
                GroupRole::Primitive { gadget } => Some((g.id.clone(), gadget.clone())),
                _ => None,
            })
            .collect();
        if primitive_groups.is_empty() {
            return;
        }

        for round in 0..MAX_SETTLE_ROUNDS {
            let mut unsettled: Vec<&GroupId> = Vec::new();
            for (group, gadget) in &primitive_groups {
                if self.evaluate_primitive(group, gadget) {
                    unsettled.push(group);
                }
            }
            if unsettled.is_empty() {
                return;
            }
            if round + 1 == MAX_SETTLE_ROUNDS {
                warn!(?unsettled, "primitive execution hit the settle bound");
            }
        }
    }

    /// Evaluate one primitive group. Returns true when any output changed.
    fn evaluate_primitive(&mut self, group: &GroupId, gadget: &str) -> bool {
        let (inputs, outputs) = {
            let Some(spec) = self.groups.get(group) else {
                return false;
            };
            let mut inputs = BTreeMap::new();
            for cid in &spec.inputs {
                let Some(state) = self.contacts.get(cid) else {
                    continue;
                };
                if state.content.is_null() {
                    // Primitives fire only once all inputs are present.
                    return false;
                }
                let name = state.spec.name.clone().unwrap_or_else(|| cid.0.clone());
                inputs.insert(name, state.content.clone());
            }
            (inputs, spec.outputs.clone())
        };

        let Some(result) = primitives::evaluate(gadget, &inputs) else {
            return false;
        };

        let mut changed = false;
        for output in outputs {
            if self.apply_value(&output, &result, true) {
                self.propagate_from(&output);
                changed = true;
            }
        }
        if changed {
            debug!(%group, gadget, "primitive produced new output");
        }
        changed
    }

    // --- Reads ---

    pub fn content(&self, contact: &ContactId) -> Option<&Value> {
        self.contacts.get(contact).map(|c| &c.content)
    }

    pub fn contact(&self, contact: &ContactId) -> Option<&ContactState> {
        self.contacts.get(contact)
    }

    pub fn group(&self, group: &GroupId) -> Option<&GroupSpec> {
        self.groups.get(group)
    }

    pub fn wire(&self, wire: &WireId) -> Option<&WireSpec> {
        self.wires.get(wire)
    }

    pub fn wires(&self) -> impl Iterator<Item = &WireSpec> {
        self.wires.values()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &ContactState> {
        self.contacts.values()
    }

    /// Contact ids whose content is still null (the targets of aggressive
    /// sync after a partition heals).
    pub fn missing_contacts(&self) -> Vec<ContactId> {
        self.contacts
            .values()
            .filter(|c| c.content.is_null())
            .map(|c| c.spec.id.clone())
            .collect()
    }

    /// `(contacts with known content) / (total contacts) × 100`.
    pub fn convergence_percent(&self) -> f64 {
        let total = self.contacts.len();
        if total == 0 {
            return 100.0;
        }
        let known = self.contacts.values().filter(|c| !c.content.is_null()).count();
        known as f64 / total as f64 * 100.0
    }

    /// Drain queued derived-change records.
    pub fn drain_changes(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.changes)
    }

    // --- Snapshots ---

    /// Snapshot one group: its spec, the contents of its contacts and the
    /// wires attributed to it.
    pub fn get_state(&self, group: &GroupId) -> Option<GroupState> {
        let spec = self.groups.get(group)?.clone();
        let contents = self
            .contacts
            .values()
            .filter(|c| &c.spec.group == group)
            .map(|c| (c.spec.id.clone(), c.content.clone()))
            .collect();
        let mut wires: Vec<WireSpec> = self
            .wires
            .values()
            .filter(|w| &w.group == group)
            .cloned()
            .collect();
        wires.sort_by(|a, b| a.id.cmp(&b.id));
        Some(GroupState {
            spec,
            contents,
            wires,
        })
    }

    /// Full structural-and-content snapshot.
    pub fn export_state(&self) -> NetworkState {
        NetworkState {
            groups: self
                .groups
                .values()
                .map(|g| (g.id.clone(), g.clone()))
                .collect(),
            contacts: self
                .contacts
                .values()
                .map(|c| (c.spec.id.clone(), c.clone()))
                .collect(),
            wires: self
                .wires
                .values()
                .map(|w| (w.id.clone(), w.clone()))
                .collect(),
        }
    }

    /// Snapshot limited to one group: its spec, its contacts, and the wires
    /// it owns.
    pub fn export_group(&self, group: &GroupId) -> Option<NetworkState> {
        let spec = self.groups.get(group)?.clone();
        Some(NetworkState {
            groups: std::iter::once((spec.id.clone(), spec)).collect(),
            contacts: self
                .contacts
                .values()
                .filter(|c| &c.spec.group == group)
                .map(|c| (c.spec.id.clone(), c.clone()))
                .collect(),
            wires: self
                .wires
                .values()
                .filter(|w| &w.group == group)
                .map(|w| (w.id.clone(), w.clone()))
                .collect(),
        })
    }

    /// Replace all in-memory state with a snapshot. Not an additive merge;
    /// pending change records are discarded with the old state.
    pub fn import_state(&mut self, state: NetworkState) {
        self.groups = state.groups.into_iter().map(|(k, v)| (k, v)).collect();
        self.contacts = state.contacts.into_iter().map(|(k, v)| (k, v)).collect();
        self.wires = state.wires.into_iter().map(|(k, v)| (k, v)).collect();
        self.changes.clear();
    }

    // --- Deletion (eager referential integrity) ---

    /// Delete a group, its subgroups, and their contacts and wires.
    pub fn delete_group(&mut self, group: &GroupId) {
        let children: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.parent.as_ref() == Some(group))
            .map(|g| g.id.clone())
            .collect();
        for child in children {
            self.delete_group(&child);
        }

        let contacts: Vec<ContactId> = self
            .contacts
            .values()
            .filter(|c| &c.spec.group == group)
            .map(|c| c.spec.id.clone())
            .collect();
        for contact in contacts {
            self.delete_contact(&contact);
        }

        self.groups.remove(group);
    }

    /// Delete a contact and every wire touching it.
    pub fn delete_contact(&mut self, contact: &ContactId) {
        let incident: Vec<WireId> = self
            .wires
            .values()
            .filter(|w| w.touches(contact))
            .map(|w| w.id.clone())
            .collect();
        for wire in incident {
            self.wires.remove(&wire);
        }

        if let Some(state) = self.contacts.remove(contact) {
            if let Some(group) = self.groups.get_mut(&state.spec.group) {
                group.inputs.retain(|c| c != contact);
                group.outputs.retain(|c| c != contact);
            }
        }
    }

    pub fn delete_wire(&mut self, wire: &WireId) {
        self.wires.remove(wire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bassline_topology::BlendMode;
    use serde_json::json;

    fn engine_with_group(id: &str) -> PropagationEngine {
        let mut engine = PropagationEngine::new();
        engine.register_group(GroupSpec::container(id, id));
        engine
    }

    fn plain_contact(engine: &mut PropagationEngine, group: &str, id: &str) -> ContactId {
        engine
            .add_contact(
                &group.into(),
                ContactDraft {
                    id: Some(id.into()),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn schedule_update_is_idempotent() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        engine.connect(&a, &b, WireKind::Bidirectional);

        assert!(engine.schedule_update(&a, json!(5)));
        assert!(!engine.schedule_update(&a, json!(5)));

        // Exactly one derived change (b), not two.
        let changes = engine.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].contact, b);
    }

    #[test]
    fn propagation_reaches_chain_with_two_changes() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        let c = plain_contact(&mut engine, "g", "c");
        engine.connect(&a, &b, WireKind::Bidirectional);
        engine.connect(&b, &c, WireKind::Bidirectional);

        assert!(engine.schedule_update(&a, json!(5)));
        assert_eq!(engine.content(&b), Some(&json!(5)));
        assert_eq!(engine.content(&c), Some(&json!(5)));

        let changes = engine.drain_changes();
        assert_eq!(changes.len(), 2);
        let touched: HashSet<_> = changes.iter().map(|c| c.contact.clone()).collect();
        assert_eq!(touched, HashSet::from([b, c]));
    }

    #[test]
    fn directed_wire_propagates_one_way() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        engine.connect(&a, &b, WireKind::Directed);

        engine.schedule_update(&b, json!(7));
        assert_eq!(engine.content(&a), Some(&Value::Null));

        engine.schedule_update(&a, json!(1));
        assert_eq!(engine.content(&b), Some(&json!(1)));
    }

    #[test]
    fn group_attribution_rule() {
        // All four boundary/group combinations of a cross-group wire.
        let cases = [
            // (from is boundary, to is boundary, expected owner of the wire)
            (true, false, "g2"),
            (true, true, "g2"),
            (false, false, "g1"),
            (false, true, "g1"),
        ];

        for (from_boundary, to_boundary, expected) in cases {
            let mut engine = PropagationEngine::new();
            engine.register_group(GroupSpec::container("g1", "g1"));
            engine.register_group(GroupSpec::container("g2", "g2"));

            let from = engine
                .add_contact(
                    &"g1".into(),
                    ContactDraft {
                        id: Some("from".into()),
                        boundary: from_boundary.then_some(Boundary::Output),
                        ..Default::default()
                    },
                )
                .unwrap();
            let to = engine
                .add_contact(
                    &"g2".into(),
                    ContactDraft {
                        id: Some("to".into()),
                        boundary: to_boundary.then_some(Boundary::Input),
                        ..Default::default()
                    },
                )
                .unwrap();

            let wire = engine.connect(&from, &to, WireKind::Directed).unwrap();
            assert_eq!(
                engine.wire(&wire).unwrap().group,
                GroupId::new(expected),
                "from_boundary={from_boundary} to_boundary={to_boundary}"
            );
        }
    }

    #[test]
    fn same_group_wire_belongs_to_that_group() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        let wire = engine.connect(&a, &b, WireKind::Bidirectional).unwrap();
        assert_eq!(engine.wire(&wire).unwrap().group, GroupId::new("g"));
    }

    #[test]
    fn add_primitive_computes_sum() {
        let mut engine = PropagationEngine::new();
        engine.register_group(GroupSpec::primitive("adder", "adder", "add"));

        let a = engine
            .add_contact(
                &"adder".into(),
                ContactDraft {
                    id: Some("a".into()),
                    name: Some("a".into()),
                    boundary: Some(Boundary::Input),
                    ..Default::default()
                },
            )
            .unwrap();
        let b = engine
            .add_contact(
                &"adder".into(),
                ContactDraft {
                    id: Some("b".into()),
                    name: Some("b".into()),
                    boundary: Some(Boundary::Input),
                    ..Default::default()
                },
            )
            .unwrap();
        let sum = engine
            .add_contact(
                &"adder".into(),
                ContactDraft {
                    id: Some("sum".into()),
                    name: Some("sum".into()),
                    boundary: Some(Boundary::Output),
                    ..Default::default()
                },
            )
            .unwrap();

        engine.schedule_update(&a, json!(2));
        // One input still null: no output yet.
        assert_eq!(engine.content(&sum), Some(&Value::Null));

        engine.schedule_update(&b, json!(3));
        assert_eq!(engine.content(&sum), Some(&json!(5.0)));
    }

    #[test]
    fn merge_contact_combines_instead_of_overwriting() {
        let mut engine = engine_with_group("g");
        let m = engine
            .add_contact(
                &"g".into(),
                ContactDraft {
                    id: Some("m".into()),
                    blend_mode: Some(BlendMode::Merge),
                    ..Default::default()
                },
            )
            .unwrap();

        engine.schedule_update(&m, json!({"a": 1}));
        engine.schedule_update(&m, json!({"b": 2}));
        assert_eq!(engine.content(&m), Some(&json!({"a": 1, "b": 2})));
    }

    #[test]
    fn export_import_round_trip() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        engine.connect(&a, &b, WireKind::Bidirectional);
        engine.schedule_update(&a, json!("hello"));

        let snapshot = engine.export_state();
        let mut fresh = PropagationEngine::new();
        fresh.import_state(snapshot);

        assert_eq!(
            engine.get_state(&"g".into()),
            fresh.get_state(&"g".into())
        );
    }

    #[test]
    fn export_group_filters_to_one_group() {
        let mut engine = engine_with_group("g1");
        engine.register_group(GroupSpec::container("g2", "g2"));
        let a = plain_contact(&mut engine, "g1", "a");
        let b = plain_contact(&mut engine, "g2", "b");
        engine.connect(&a, &b, WireKind::Bidirectional);

        let partial = engine.export_group(&"g1".into()).unwrap();
        assert_eq!(partial.groups.len(), 1);
        assert!(partial.contacts.contains_key(&a));
        assert!(!partial.contacts.contains_key(&b));
        assert!(engine.export_group(&"absent".into()).is_none());
    }

    #[test]
    fn delete_contact_cascades_to_wires() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        let wire = engine.connect(&a, &b, WireKind::Bidirectional).unwrap();

        engine.delete_contact(&a);
        assert!(engine.contact(&a).is_none());
        assert!(engine.wire(&wire).is_none());
        assert!(engine.contact(&b).is_some());
    }

    #[test]
    fn delete_group_cascades_recursively() {
        let mut engine = engine_with_group("parent");
        let mut child = GroupSpec::container("child", "child");
        child.parent = Some("parent".into());
        engine.register_group(child);

        let p = plain_contact(&mut engine, "parent", "p");
        let c = plain_contact(&mut engine, "child", "c");
        engine.connect(&p, &c, WireKind::Bidirectional);

        engine.delete_group(&"parent".into());
        assert!(engine.group(&"parent".into()).is_none());
        assert!(engine.group(&"child".into()).is_none());
        assert!(engine.contact(&p).is_none());
        assert!(engine.contact(&c).is_none());
        assert_eq!(engine.wires().count(), 0);
    }

    #[test]
    fn missing_ids_are_benign_noops() {
        let mut engine = PropagationEngine::new();
        assert!(!engine.schedule_update(&"ghost".into(), json!(1)));
        assert!(engine
            .add_contact(&"nowhere".into(), ContactDraft::default())
            .is_none());
        engine.delete_group(&"nowhere".into());
        engine.delete_contact(&"ghost".into());
    }

    #[test]
    fn convergence_percent_counts_known_content() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let _b = plain_contact(&mut engine, "g", "b");
        assert_eq!(engine.convergence_percent(), 0.0);
        engine.schedule_update(&a, json!(1));
        assert_eq!(engine.convergence_percent(), 50.0);
    }

    #[test]
    fn convergence_never_decreases_as_updates_apply() {
        let mut engine = engine_with_group("g");
        let a = plain_contact(&mut engine, "g", "a");
        let b = plain_contact(&mut engine, "g", "b");
        let c = plain_contact(&mut engine, "g", "c");
        let d = plain_contact(&mut engine, "g", "d");
        engine.connect(&a, &b, WireKind::Bidirectional);
        engine.connect(&b, &c, WireKind::Bidirectional);

        // Fresh values, re-sends, overwrites and propagated copies: the
        // percentage only ever climbs, since content never returns to null.
        let updates = [
            (&a, json!(1)),
            (&a, json!(1)),
            (&d, json!("side")),
            (&a, json!(2)),
            (&d, json!("side")),
        ];
        let mut last = engine.convergence_percent();
        for (contact, content) in updates {
            engine.schedule_update(contact, content);
            let now = engine.convergence_percent();
            assert!(now >= last, "convergence regressed: {last} -> {now}");
            last = now;
        }
        assert_eq!(last, 100.0);
    }
}
