//! The topology: groups, contacts and wires.
//!
//! A topology is pure data. Participants must agree on it bit-for-bit, so
//! the keyed collections are `BTreeMap`s — iteration order is deterministic
//! and feeds directly into the canonical hash.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ContactId, GroupId, WireId};
use crate::reference::BasslineReference;
use crate::Endpoint;

/// The three keyed collections making up one network's structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub groups: BTreeMap<GroupId, GroupSpec>,
    pub contacts: BTreeMap<ContactId, ContactSpec>,
    pub wires: BTreeMap<WireId, WireSpec>,
}

impl Topology {
    /// Whether the topology carries no structure at all.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.contacts.is_empty() && self.wires.is_empty()
    }

    /// Total number of contacts (the denominator for convergence reporting).
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Contacts belonging to a group.
    pub fn contacts_in_group<'a>(
        &'a self,
        group: &'a GroupId,
    ) -> impl Iterator<Item = &'a ContactSpec> {
        self.contacts.values().filter(move |c| &c.group == group)
    }
}

/// What backs a group's behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupRole {
    /// A plain container with no behavior of its own.
    #[default]
    Container,
    /// A primitive gadget (pure function over the group's boundary contacts).
    Primitive { gadget: String },
    /// The group is an entire nested network, bridged at its boundary.
    SubBassline { reference: BasslineReference },
}

/// A named region of the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<GroupId>,
    /// Ordered boundary input contacts.
    #[serde(default)]
    pub inputs: Vec<ContactId>,
    /// Ordered boundary output contacts.
    #[serde(default)]
    pub outputs: Vec<ContactId>,
    #[serde(default)]
    pub role: GroupRole,
    /// Ownership hint: the endpoint expected to host this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_endpoint: Option<Endpoint>,
    /// Ownership hint: endpoints expected to replicate this group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replica_endpoints: Vec<Endpoint>,
}

impl GroupSpec {
    /// A plain container group.
    pub fn container(id: impl Into<GroupId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            role: GroupRole::Container,
            primary_endpoint: None,
            replica_endpoints: Vec::new(),
        }
    }

    /// A group backed by a primitive gadget.
    pub fn primitive(id: impl Into<GroupId>, name: impl Into<String>, gadget: impl Into<String>) -> Self {
        Self {
            role: GroupRole::Primitive { gadget: gadget.into() },
            ..Self::container(id, name)
        }
    }

    /// Whether this group is hosted by a nested network.
    pub fn is_sub_bassline(&self) -> bool {
        matches!(self.role, GroupRole::SubBassline { .. })
    }

    /// The nested-network reference, if any.
    pub fn sub_bassline(&self) -> Option<&BasslineReference> {
        match &self.role {
            GroupRole::SubBassline { reference } => Some(reference),
            _ => None,
        }
    }
}

/// Per-contact conflict-resolution policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Last write wins; racing writers can lose updates.
    #[default]
    AcceptLast,
    /// Commutative, associative, idempotent combine of old and new content.
    Merge,
}

/// Declared boundary direction of a contact within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Boundary {
    Input,
    Output,
}

/// A single reactive cell; the unit of content and of ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSpec {
    pub id: ContactId,
    pub group: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Boundary>,
    /// Optional JSON-schema-style shape expected of the contact's content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

impl ContactSpec {
    pub fn new(id: impl Into<ContactId>, group: impl Into<GroupId>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            name: None,
            blend_mode: BlendMode::AcceptLast,
            boundary: None,
            schema: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn blend(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    /// Whether this contact sits on its group's boundary.
    pub fn is_boundary(&self) -> bool {
        self.boundary.is_some()
    }
}

/// Directionality of a wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireKind {
    /// Content flows both ways.
    #[default]
    Bidirectional,
    /// Content flows from `from` to `to` only.
    Directed,
}

/// A propagation link between two contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSpec {
    pub id: WireId,
    pub from: ContactId,
    pub to: ContactId,
    #[serde(default)]
    pub kind: WireKind,
    /// Owning group, derived from the endpoints at creation time.
    pub group: GroupId,
    /// Tie-break weight in affinity scoring.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub required: bool,
}

fn default_priority() -> u32 {
    1
}

impl WireSpec {
    /// Whether this wire touches the given contact on either end.
    pub fn touches(&self, contact: &ContactId) -> bool {
        &self.from == contact || &self.to == contact
    }

    /// The other endpoint relative to `contact`, if `contact` is an endpoint.
    pub fn other_end(&self, contact: &ContactId) -> Option<&ContactId> {
        if &self.from == contact {
            Some(&self.to)
        } else if &self.to == contact {
            Some(&self.from)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_role_serde_tags() {
        let role = GroupRole::Primitive { gadget: "add".into() };
        let json = serde_json::to_value(&role).unwrap();
        assert_eq!(json["kind"], "primitive");
        assert_eq!(json["gadget"], "add");

        let container: GroupRole = serde_json::from_value(serde_json::json!({
            "kind": "container"
        }))
        .unwrap();
        assert_eq!(container, GroupRole::Container);
    }

    #[test]
    fn wire_other_end() {
        let wire = WireSpec {
            id: "w1".into(),
            from: "a".into(),
            to: "b".into(),
            kind: WireKind::Directed,
            group: "g".into(),
            priority: 1,
            required: false,
        };
        assert_eq!(wire.other_end(&"a".into()), Some(&ContactId::new("b")));
        assert_eq!(wire.other_end(&"b".into()), Some(&ContactId::new("a")));
        assert_eq!(wire.other_end(&"c".into()), None);
    }

    #[test]
    fn contact_defaults() {
        let contact = ContactSpec::new("c1", "g1");
        assert_eq!(contact.blend_mode, BlendMode::AcceptLast);
        assert!(!contact.is_boundary());
    }
}
