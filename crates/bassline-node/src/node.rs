//! The node composer: one joined Bassline, end to end.
//!
//! `join` wires the layers together in dependency order: validate the
//! definition, seed the engine, hydrate from storage, open the gossip
//! listener, dial the peers hosting remote groups, start the timers, and
//! finally spawn a nested node for every local sub-Bassline group.
//! `shutdown` tears the same stack down in reverse.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bassline_engine::PropagationEngine;
use bassline_gossip::{GossipConfig, GossipEvent, GossipService};
use bassline_store::PersistentEngine;
use bassline_topology::{Bassline, ContactId, GroupId, PeerId};

use crate::config::{GroupSelection, NodeConfig};
use crate::error::{Error, Result};
use crate::events::NodeEvent;
use crate::sub::{self, SubNetwork};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct NodeInner {
    pub(crate) config: NodeConfig,
    pub(crate) bassline: Arc<Bassline>,
    pub(crate) engine: Arc<RwLock<PropagationEngine>>,
    pub(crate) persist: Option<PersistentEngine>,
    pub(crate) gossip: GossipService,
    pub(crate) events: broadcast::Sender<NodeEvent>,
    pub(crate) local_groups: HashSet<GroupId>,
    pub(crate) subs: Mutex<Vec<SubNetwork>>,
    pub(crate) tasks: StdMutex<Vec<JoinHandle<()>>>,
    converged: AtomicBool,
    listen_addr: StdMutex<Option<SocketAddr>>,
}

/// Cheaply cloneable handle to a running node.
#[derive(Clone)]
pub struct BasslineNode {
    pub(crate) inner: Arc<NodeInner>,
}

impl BasslineNode {
    /// Join a Bassline network. Fatal on an invalid topology or a failed
    /// signature check; peer dial failures are not fatal (the timers retry
    /// reachability through sync and heartbeat).
    pub async fn join(bassline: Bassline, config: NodeConfig) -> Result<Self> {
        bassline.validate()?;
        bassline.verify_signature()?;

        let local_groups = select_groups(&bassline, &config.groups)?;
        info!(
            id = %bassline.id,
            version = %bassline.version,
            peer = %config.peer_id,
            groups = ?local_groups,
            "joining bassline"
        );

        let bassline = Arc::new(bassline);
        let engine = Arc::new(RwLock::new(PropagationEngine::from_topology(
            &bassline.topology,
        )));

        let persist = match &config.backend {
            Some(backend) => {
                let persist = PersistentEngine::new(
                    bassline.id.clone(),
                    Arc::clone(&engine),
                    Arc::clone(backend),
                    config.persist_debounce,
                );
                persist.initialize().await?;
                if persist.hydrate().await? {
                    info!(id = %bassline.id, "hydrated engine state from storage");
                }
                Some(persist)
            }
            None => None,
        };

        let (gossip_tx, gossip_rx) = mpsc::unbounded_channel();
        let gossip = GossipService::new(
            GossipConfig {
                local_peer: config.peer_id.clone(),
                listen_addr: config.listen_addr,
                max_peers: config.max_peers,
            },
            Arc::clone(&bassline),
            local_groups.clone(),
            Arc::clone(&engine),
            gossip_tx,
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let node = Self {
            inner: Arc::new(NodeInner {
                config,
                bassline: Arc::clone(&bassline),
                engine,
                persist,
                gossip,
                events,
                local_groups,
                subs: Mutex::new(Vec::new()),
                tasks: StdMutex::new(Vec::new()),
                converged: AtomicBool::new(false),
                listen_addr: StdMutex::new(None),
            }),
        };

        node.spawn_event_pump(gossip_rx);

        if node.inner.config.listen_addr.is_some() {
            match node.inner.gossip.listen().await {
                Ok(bound) => {
                    *node
                        .inner
                        .listen_addr
                        .lock()
                        .expect("listen addr poisoned") = Some(bound);
                }
                Err(e) => {
                    node.shutdown().await;
                    return Err(e.into());
                }
            }
        }

        node.dial_remote_endpoints().await;
        node.start_timers();
        if let Err(e) = sub::start_all(&node).await {
            node.shutdown().await;
            return Err(e);
        }

        // A hydrated node may already hold every contact.
        node.check_convergence().await;
        let _ = node.inner.events.send(NodeEvent::BasslineLoaded {
            id: bassline.id.clone(),
            version: bassline.version.clone(),
        });
        Ok(node)
    }

    // --- Content ---

    /// Update a contact locally: engine (with persistence when configured),
    /// then gossip the resolved value to peers. Returns whether the contact
    /// itself changed.
    pub async fn schedule_update(&self, contact: &ContactId, content: Value) -> Result<bool> {
        let size = serde_json::to_vec(&content)?.len();
        if size > self.inner.config.max_content_size {
            return Err(Error::LimitExceeded(format!(
                "content for {contact} is {size} bytes, ceiling is {}",
                self.inner.config.max_content_size
            )));
        }

        let (changed, resolved, derived) = match &self.inner.persist {
            Some(persist) => {
                let (changed, derived) = persist.schedule_update(contact, content).await?;
                let resolved = self.content(contact).await;
                (changed, resolved, derived)
            }
            None => {
                let mut engine = self.inner.engine.write().await;
                let changed = engine.schedule_update(contact, content);
                let resolved = engine.content(contact).cloned();
                (changed, resolved, engine.drain_changes())
            }
        };

        if changed {
            if let Some(resolved) = &resolved {
                self.inner.gossip.announce_content(contact, resolved).await;
                let _ = self.inner.events.send(NodeEvent::ContentUpdated {
                    contact: contact.clone(),
                    content: resolved.clone(),
                });
            }
        }
        for record in derived {
            let _ = self.inner.events.send(NodeEvent::ContentUpdated {
                contact: record.contact,
                content: record.content,
            });
        }

        self.check_convergence().await;
        Ok(changed)
    }

    pub async fn content(&self, contact: &ContactId) -> Option<Value> {
        self.inner.engine.read().await.content(contact).cloned()
    }

    pub async fn convergence_percent(&self) -> f64 {
        self.inner.engine.read().await.convergence_percent()
    }

    // --- Introspection ---

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.inner.config.peer_id
    }

    pub fn local_groups(&self) -> &HashSet<GroupId> {
        &self.inner.local_groups
    }

    pub fn bassline(&self) -> &Bassline {
        &self.inner.bassline
    }

    /// The bound gossip address, once listening.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.inner.listen_addr.lock().expect("listen addr poisoned")
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.gossip.peer_count().await
    }

    /// Direct engine access for embedding layers that need more than
    /// `schedule_update` (state export, dynamic contacts).
    pub fn engine(&self) -> Arc<RwLock<PropagationEngine>> {
        Arc::clone(&self.inner.engine)
    }

    // --- Lifecycle ---

    /// Shut down in reverse join order: sub-networks, timers, peer
    /// connections, then the final persistence flush.
    pub async fn shutdown(&self) {
        let subs: Vec<SubNetwork> = self.inner.subs.lock().await.drain(..).collect();
        for sub_net in subs {
            for bridge in sub_net.bridges {
                bridge.abort();
            }
            Box::pin(sub_net.node.shutdown()).await;
        }

        for task in self
            .inner
            .tasks
            .lock()
            .expect("node tasks poisoned")
            .drain(..)
        {
            task.abort();
        }

        self.inner.gossip.shutdown().await;

        if let Some(persist) = &self.inner.persist {
            if let Err(e) = persist.close().await {
                error!(error = %e, "final persistence flush failed");
            }
        }
        info!(peer = %self.peer_id(), "node shut down");
    }

    // --- Internals ---

    fn spawn_event_pump(&self, mut rx: mpsc::UnboundedReceiver<GossipEvent>) {
        let node = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                node.handle_gossip_event(event).await;
            }
        });
        self.inner
            .tasks
            .lock()
            .expect("node tasks poisoned")
            .push(pump);
    }

    async fn handle_gossip_event(&self, event: GossipEvent) {
        match event {
            GossipEvent::PeerConnected(peer) => {
                let _ = self.inner.events.send(NodeEvent::PeerConnected(peer));
            }
            GossipEvent::PeerDisconnected(peer) => {
                let _ = self.inner.events.send(NodeEvent::PeerDisconnected(peer));
            }
            GossipEvent::HashMismatch { .. } => {
                // Already logged at the gossip layer; divergence is a
                // protocol error with no automatic resolution.
            }
            GossipEvent::ContentUpdated { contact, content } => {
                if let Some(persist) = &self.inner.persist {
                    if let Err(e) = persist.save_contact(&contact).await {
                        // Storage errors are fatal; the next flush fails.
                        error!(%contact, error = %e, "failed to persist remote update");
                        persist.record_failure(&e);
                    }
                }
                let _ = self
                    .inner
                    .events
                    .send(NodeEvent::ContentUpdated { contact, content });
                self.check_convergence().await;
            }
            GossipEvent::WiresBroken(wires) => {
                for wire in &wires {
                    let _ = self.inner.events.send(NodeEvent::WireBroken(wire.clone()));
                }
                let _ = self
                    .inner
                    .events
                    .send(NodeEvent::PartitionDetected { broken_wires: wires });
            }
            GossipEvent::WiresHealed(wires) => {
                for wire in &wires {
                    let _ = self.inner.events.send(NodeEvent::WireHealed(wire.clone()));
                }
                let _ = self
                    .inner
                    .events
                    .send(NodeEvent::PartitionHealed { healed_wires: wires });
            }
            GossipEvent::SubBasslineAnnounced { group, reference } => {
                info!(%group, nested = %reference.id, "peer runs a nested network");
            }
        }
    }

    /// Dial the declared host of every group we do not run ourselves.
    async fn dial_remote_endpoints(&self) {
        let mut dialed: HashSet<PeerId> = HashSet::new();
        for (group, endpoint) in &self.inner.bassline.endpoints {
            if self.inner.local_groups.contains(group) {
                continue;
            }
            if endpoint.peer == self.inner.config.peer_id {
                continue;
            }
            if !dialed.insert(endpoint.peer.clone()) {
                continue;
            }
            if let Err(e) = self.inner.gossip.dial(endpoint).await {
                warn!(%group, url = %endpoint.url, error = %e, "failed to dial group host");
            }
        }
    }

    fn start_timers(&self) {
        let mut tasks = self.inner.tasks.lock().expect("node tasks poisoned");

        let gossip = self.inner.gossip.clone();
        let sync_interval = self.inner.config.sync_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                gossip.request_missing().await;
            }
        }));

        let gossip = self.inner.gossip.clone();
        let heartbeat_interval = self.inner.config.heartbeat_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                gossip.announce_ownership().await;
            }
        }));

        let gossip = self.inner.gossip.clone();
        let partition_interval = self.inner.config.partition_check_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(partition_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                gossip.check_partitions().await;
            }
        }));
    }

    async fn check_convergence(&self) {
        let percent = self.inner.engine.read().await.convergence_percent();
        if percent >= 100.0 && !self.inner.converged.swap(true, Ordering::SeqCst) {
            info!(peer = %self.peer_id(), "full convergence reached");
            let _ = self
                .inner
                .events
                .send(NodeEvent::ConvergenceAchieved { percent });
        }
    }
}

/// Resolve the configured group selection against the topology.
fn select_groups(bassline: &Bassline, selection: &GroupSelection) -> Result<HashSet<GroupId>> {
    match selection {
        GroupSelection::Explicit(ids) => {
            for id in ids {
                if !bassline.topology.groups.contains_key(id) {
                    return Err(Error::Config(format!("unknown group: {id}")));
                }
            }
            Ok(ids.iter().cloned().collect())
        }
        GroupSelection::Auto => {
            // Underserved first: groups nobody has declared an endpoint
            // for. Sub-Bassline groups are never auto-selected; running a
            // nested network is an explicit choice.
            let candidates: Vec<_> = bassline
                .topology
                .groups
                .values()
                .filter(|g| !g.is_sub_bassline())
                .collect();
            let underserved: HashSet<GroupId> = candidates
                .iter()
                .filter(|g| !bassline.endpoints.contains_key(&g.id) && g.primary_endpoint.is_none())
                .map(|g| g.id.clone())
                .collect();
            if !underserved.is_empty() {
                return Ok(underserved);
            }
            // Every group is served somewhere; hold the first as a replica.
            candidates
                .first()
                .map(|g| HashSet::from([g.id.clone()]))
                .ok_or_else(|| Error::Config("no groups available for auto-selection".into()))
        }
    }
}
