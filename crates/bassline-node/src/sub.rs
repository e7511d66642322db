//! Sub-Bassline composition.
//!
//! A group whose role references another Bassline is hosted by running a
//! complete nested node inside this process, with a peer id namespaced
//! under the parent's. The group's declared boundary lists drive the
//! bridge: input contacts forward parent-side updates down into the child,
//! output contacts forward child-side updates back up. Each contact
//! bridges in exactly one direction.

use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use bassline_topology::{ContactId, GroupId, GroupSpec};

use crate::config::{GroupSelection, NodeConfig};
use crate::error::{Error, Result};
use crate::events::NodeEvent;
use crate::node::BasslineNode;

/// A running nested network and its boundary bridges.
pub(crate) struct SubNetwork {
    pub group: GroupId,
    pub node: BasslineNode,
    pub bridges: Vec<JoinHandle<()>>,
}

/// Start a nested node for every local sub-Bassline group.
pub(crate) async fn start_all(parent: &BasslineNode) -> Result<()> {
    let nested: Vec<GroupSpec> = parent
        .inner
        .bassline
        .topology
        .groups
        .values()
        .filter(|g| parent.inner.local_groups.contains(&g.id) && g.is_sub_bassline())
        .cloned()
        .collect();

    for spec in nested {
        start_one(parent, &spec).await?;
    }
    Ok(())
}

async fn start_one(parent: &BasslineNode, spec: &GroupSpec) -> Result<()> {
    let running = parent.inner.subs.lock().await.len();
    if running >= parent.inner.config.max_sub_networks {
        return Err(Error::LimitExceeded(format!(
            "sub-network ceiling of {} reached at group {}",
            parent.inner.config.max_sub_networks, spec.id
        )));
    }

    let Some(reference) = spec.sub_bassline() else {
        return Ok(());
    };
    let fetcher = parent.inner.config.fetcher.clone().ok_or_else(|| {
        Error::Fetch(format!(
            "group {} references bassline {} but no fetcher is configured",
            spec.id, reference.id
        ))
    })?;
    let child_bassline = fetcher.fetch(reference).await?;
    let child_id = child_bassline.id.clone();

    let child_config = NodeConfig {
        peer_id: parent.peer_id().namespaced(&spec.id),
        listen_addr: None,
        groups: GroupSelection::Auto,
        backend: None,
        fetcher: Some(fetcher),
        ..parent.inner.config.clone()
    };

    // Recursive join through a boxed future; sub-Basslines nest.
    let child = Box::pin(BasslineNode::join(child_bassline, child_config)).await?;
    let bridges = bridge_boundaries(parent, &child, spec);

    info!(group = %spec.id, nested = %child_id, "sub-bassline started");
    parent
        .inner
        .gossip
        .broadcast(bassline_gossip::PeerMessage::SubBasslineAnnounce {
            group: spec.id.clone(),
            reference: reference.clone(),
        })
        .await;
    let _ = parent.inner.events.send(NodeEvent::SubBasslineStarted {
        group: spec.id.clone(),
        bassline: child_id,
    });

    parent.inner.subs.lock().await.push(SubNetwork {
        group: spec.id.clone(),
        node: child,
        bridges,
    });
    Ok(())
}

/// Spawn the two directional forwarders for a sub-group's boundary.
fn bridge_boundaries(
    parent: &BasslineNode,
    child: &BasslineNode,
    spec: &GroupSpec,
) -> Vec<JoinHandle<()>> {
    let inputs: HashSet<ContactId> = spec
        .inputs
        .iter()
        .filter(|c| child.bassline().topology.contacts.contains_key(c))
        .cloned()
        .collect();
    let outputs: HashSet<ContactId> = spec
        .outputs
        .iter()
        .filter(|c| {
            if inputs.contains(c) {
                // One direction per contact; input wins.
                warn!(contact = %c, group = %spec.id, "boundary contact declared both ways; bridging down only");
                return false;
            }
            parent.bassline().topology.contacts.contains_key(c)
        })
        .cloned()
        .collect();

    vec![
        spawn_forwarder(parent, child, inputs, "down"),
        spawn_forwarder(child, parent, outputs, "up"),
    ]
}

/// Forward `ContentUpdated` events for the given contacts from one node's
/// event stream into the other node's engine. The engine's no-op-on-equal
/// rule stops echo loops.
fn spawn_forwarder(
    source: &BasslineNode,
    target: &BasslineNode,
    contacts: HashSet<ContactId>,
    direction: &'static str,
) -> JoinHandle<()> {
    let mut events = source.subscribe();
    let target = target.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NodeEvent::ContentUpdated { contact, content })
                    if contacts.contains(&contact) =>
                {
                    if let Err(e) = target.schedule_update(&contact, content).await {
                        warn!(%contact, direction, error = %e, "boundary bridge update failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(direction, skipped, "boundary bridge lagged behind events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::StaticFetcher;
    use bassline_topology::{
        Bassline, BasslineReference, Boundary, ContactSpec, GroupRole, Topology,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Child network: one group, boundary input `in`, boundary output `out`,
    /// wired straight through.
    fn child_bassline() -> Bassline {
        let mut topology = Topology::default();
        let mut group = GroupSpec::container("inner", "inner");
        group.inputs = vec!["in".into()];
        group.outputs = vec!["out".into()];
        topology.groups.insert("inner".into(), group);
        topology.contacts.insert(
            "in".into(),
            ContactSpec::new("in", "inner").boundary(Boundary::Input),
        );
        topology.contacts.insert(
            "out".into(),
            ContactSpec::new("out", "inner").boundary(Boundary::Output),
        );
        topology.wires.insert(
            "w".into(),
            bassline_topology::WireSpec {
                id: "w".into(),
                from: "in".into(),
                to: "out".into(),
                kind: bassline_topology::WireKind::Directed,
                group: "inner".into(),
                priority: 1,
                required: false,
            },
        );
        Bassline::new("child-net", "1.0.0", topology)
    }

    /// Parent network: a sub-Bassline group bridging `in` down and `out`
    /// up, with mirror contacts living in the parent topology.
    fn parent_bassline() -> Bassline {
        let mut topology = Topology::default();
        let mut group = GroupSpec::container("nested", "nested");
        group.role = GroupRole::SubBassline {
            reference: BasslineReference::by_id("child-net"),
        };
        group.inputs = vec!["in".into()];
        group.outputs = vec!["out".into()];
        topology.groups.insert("nested".into(), group);
        topology.contacts.insert(
            "in".into(),
            ContactSpec::new("in", "nested").boundary(Boundary::Input),
        );
        topology.contacts.insert(
            "out".into(),
            ContactSpec::new("out", "nested").boundary(Boundary::Output),
        );
        Bassline::new("parent-net", "1.0.0", topology)
    }

    #[tokio::test]
    async fn sub_bassline_bridges_both_directions() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(child_bassline());

        let mut config = NodeConfig::default();
        config.groups = GroupSelection::Explicit(vec!["nested".into()]);
        config.fetcher = Some(fetcher);

        let parent = BasslineNode::join(parent_bassline(), config).await.unwrap();
        assert_eq!(parent.inner.subs.lock().await.len(), 1);
        assert_eq!(
            parent.inner.subs.lock().await[0].node.peer_id().as_str(),
            format!("{}/nested", parent.peer_id())
        );

        // Down: parent-side input lands in the child and flows through its
        // wire to the child's output, then back up to the parent.
        parent.schedule_update(&"in".into(), json!(41)).await.unwrap();

        let mut round_trip = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(value) = parent.content(&"out".into()).await {
                if !value.is_null() {
                    round_trip = Some(value);
                    break;
                }
            }
        }
        assert_eq!(round_trip, Some(json!(41)));

        parent.shutdown().await;
    }

    #[tokio::test]
    async fn missing_fetcher_is_fatal_for_nested_groups() {
        let mut config = NodeConfig::default();
        config.groups = GroupSelection::Explicit(vec!["nested".into()]);

        let result = BasslineNode::join(parent_bassline(), config).await;
        assert!(matches!(result, Err(Error::Fetch(_))));
    }

    #[tokio::test]
    async fn sub_network_ceiling_is_enforced() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(child_bassline());

        let mut config = NodeConfig::default();
        config.groups = GroupSelection::Explicit(vec!["nested".into()]);
        config.fetcher = Some(fetcher);
        config.max_sub_networks = 0;

        let result = BasslineNode::join(parent_bassline(), config).await;
        assert!(matches!(result, Err(Error::LimitExceeded(_))));
    }
}
