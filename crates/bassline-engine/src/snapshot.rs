//! Structural read/replace snapshots of engine state.
//!
//! These are also the shapes the persistence layer writes at rest, so they
//! serialize with stable `BTreeMap` key order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bassline_topology::{ContactId, ContactSpec, GroupId, GroupSpec, WireId, WireSpec};

/// Live state of one contact: its description plus its current content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactState {
    pub spec: ContactSpec,
    #[serde(default)]
    pub content: Value,
}

/// Snapshot of a single group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub spec: GroupSpec,
    pub contents: BTreeMap<ContactId, Value>,
    pub wires: Vec<WireSpec>,
}

/// Full snapshot of an engine: structure and content together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub groups: BTreeMap<GroupId, GroupSpec>,
    pub contacts: BTreeMap<ContactId, ContactState>,
    pub wires: BTreeMap<WireId, WireSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_state_round_trips_through_json() {
        let mut state = NetworkState::default();
        state
            .groups
            .insert("g".into(), GroupSpec::container("g", "group"));
        state.contacts.insert(
            "c".into(),
            ContactState {
                spec: ContactSpec::new("c", "g"),
                content: serde_json::json!({"n": 1}),
            },
        );

        let json = serde_json::to_string(&state).unwrap();
        let back: NetworkState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
