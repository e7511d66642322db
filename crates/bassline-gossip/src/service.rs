//! The gossip service: peer connections and message handling.
//!
//! One service per node. It owns the TCP listener and dialer, frames
//! messages as newline-delimited JSON, keeps the peer registry, and applies
//! remote state to the local engine. Messages from a single connection are
//! processed in receipt order; there is no cross-peer ordering, so blend
//! modes are the only conflict resolution.
//!
//! Everything the service learns is pushed to the node layer as
//! [`GossipEvent`]s on an explicit channel.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bassline_engine::PropagationEngine;
use bassline_topology::{
    Bassline, BasslineReference, ContactId, ContactSpec, Endpoint, GroupId, PeerId, WireId,
};

use crate::error::{Error, Result};
use crate::message::PeerMessage;
use crate::ownership::{wire_affinity, OwnershipTracker};
use crate::partition::PartitionTracker;
use crate::peer::BasslinePeer;

/// Connection-layer configuration.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub local_peer: PeerId,
    /// Address to accept peers on; `None` for dial-only nodes.
    pub listen_addr: Option<SocketAddr>,
    pub max_peers: usize,
}

/// What the gossip layer reports upward.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    /// The peer's topology hash differs from ours. Logged, never resolved.
    HashMismatch { peer: PeerId, theirs: String },
    ContentUpdated { contact: ContactId, content: Value },
    WiresBroken(Vec<WireId>),
    WiresHealed(Vec<WireId>),
    SubBasslineAnnounced {
        group: GroupId,
        reference: BasslineReference,
    },
}

/// Peer registry, ownership map and partition state under one lock.
#[derive(Default)]
pub struct GossipState {
    pub peers: std::collections::HashMap<PeerId, BasslinePeer>,
    pub ownership: OwnershipTracker,
    pub partitions: PartitionTracker,
}

struct Inner {
    config: GossipConfig,
    bassline: Arc<Bassline>,
    /// Cached canonical hash, exchanged on every connect.
    hash: String,
    local_groups: HashSet<GroupId>,
    local_contacts: HashSet<ContactId>,
    engine: Arc<RwLock<PropagationEngine>>,
    state: RwLock<GossipState>,
    events: mpsc::UnboundedSender<GossipEvent>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the gossip service.
#[derive(Clone)]
pub struct GossipService {
    inner: Arc<Inner>,
}

impl GossipService {
    pub fn new(
        config: GossipConfig,
        bassline: Arc<Bassline>,
        local_groups: HashSet<GroupId>,
        engine: Arc<RwLock<PropagationEngine>>,
        events: mpsc::UnboundedSender<GossipEvent>,
    ) -> Self {
        let local_contacts: HashSet<ContactId> = bassline
            .topology
            .contacts
            .values()
            .filter(|c| local_groups.contains(&c.group))
            .map(|c| c.id.clone())
            .collect();
        let hash = bassline.canonical_hash();

        Self {
            inner: Arc::new(Inner {
                config,
                bassline,
                hash,
                local_groups,
                local_contacts,
                engine,
                state: RwLock::new(GossipState::default()),
                events,
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.inner.config.local_peer
    }

    pub fn local_contacts(&self) -> &HashSet<ContactId> {
        &self.inner.local_contacts
    }

    // --- Connection management ---

    /// Bind the listener and start accepting peers. Returns the bound
    /// address (useful when configured with port 0).
    pub async fn listen(&self) -> Result<SocketAddr> {
        let addr = self
            .inner
            .config
            .listen_addr
            .ok_or_else(|| Error::PeerConnection("no listen address configured".into()))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, peer = %self.local_peer(), "gossip listener up");

        let this = self.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        if this.at_capacity().await {
                            warn!(%remote, "peer limit reached; refusing connection");
                            continue;
                        }
                        debug!(%remote, "accepted peer connection");
                        let conn = this.clone();
                        let handle = tokio::spawn(async move {
                            conn.run_connection(stream, None, None).await;
                        });
                        this.inner
                            .tasks
                            .lock()
                            .expect("gossip tasks poisoned")
                            .push(handle);
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed; listener stopping");
                        break;
                    }
                }
            }
        });
        self.inner
            .tasks
            .lock()
            .expect("gossip tasks poisoned")
            .push(accept_loop);
        Ok(local_addr)
    }

    /// Dial a peer's endpoint.
    pub async fn dial(&self, endpoint: &Endpoint) -> Result<()> {
        if self.at_capacity().await {
            return Err(Error::PeerConnection("peer limit reached".into()));
        }
        let started = Instant::now();
        let stream = TcpStream::connect(endpoint.address())
            .await
            .map_err(|e| Error::PeerConnection(format!("{}: {e}", endpoint.url)))?;
        let latency = started.elapsed();

        let conn = self.clone();
        let endpoint = endpoint.clone();
        let handle = tokio::spawn(async move {
            conn.run_connection(stream, Some(endpoint), Some(latency)).await;
        });
        self.inner
            .tasks
            .lock()
            .expect("gossip tasks poisoned")
            .push(handle);
        Ok(())
    }

    async fn at_capacity(&self) -> bool {
        self.inner.state.read().await.peers.len() >= self.inner.config.max_peers
    }

    /// Drive one connection to completion: handshake, then ordered message
    /// processing until the socket closes.
    async fn run_connection(
        &self,
        stream: TcpStream,
        endpoint: Option<Endpoint>,
        latency: Option<Duration>,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<PeerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write_half.write_all(msg.to_frame().as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Handshake: identity first, then what we own.
        let _ = tx.send(PeerMessage::BasslineHash {
            peer: self.local_peer().clone(),
            hash: self.inner.hash.clone(),
            version: self.inner.bassline.version.clone(),
        });
        let _ = tx.send(self.ownership_announcement());

        let mut lines = BufReader::new(read_half).lines();
        let mut registered: Option<PeerId> = None;

        while let Ok(Some(line)) = lines.next_line().await {
            let msg = match serde_json::from_str::<PeerMessage>(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    // Malformed or unknown frame: drop it, keep the link.
                    warn!(error = %e, "dropping malformed gossip frame");
                    continue;
                }
            };

            match &registered {
                None => match msg {
                    PeerMessage::BasslineHash { peer, hash, version } => {
                        if peer == *self.local_peer() {
                            warn!("connected to self; dropping link");
                            break;
                        }
                        let mut entry = BasslinePeer::new(peer.clone(), tx.clone());
                        entry.endpoint = endpoint.clone();
                        entry.latency = latency;

                        if !self.admit_peer(entry).await {
                            break;
                        }

                        info!(%peer, "peer connected");
                        registered = Some(peer.clone());
                        self.compare_hash(&peer, &hash, &version);
                        let _ = self.inner.events.send(GossipEvent::PeerConnected(peer));
                    }
                    other => {
                        warn!(?other, "message before identification; dropping");
                    }
                },
                Some(peer) => {
                    let peer = peer.clone();
                    if let Some(entry) = self.inner.state.write().await.peers.get_mut(&peer) {
                        entry.touch();
                    }
                    self.handle_message(&peer, msg).await;
                }
            }
        }

        // Cancel any sends still queued for this connection.
        writer.abort();

        if let Some(peer) = registered {
            self.handle_disconnect(&peer).await;
        }
    }

    /// Register an identified connection. Refused when the ceiling is hit
    /// or the peer is already connected (as when both sides dial each
    /// other); the existing link stays authoritative and the new one is
    /// dropped without touching it.
    async fn admit_peer(&self, entry: BasslinePeer) -> bool {
        let mut state = self.inner.state.write().await;
        if state.peers.len() >= self.inner.config.max_peers {
            warn!(peer = %entry.id, "peer limit reached after accept; dropping link");
            return false;
        }
        if state.peers.contains_key(&entry.id) {
            warn!(peer = %entry.id, "peer already connected; dropping duplicate link");
            return false;
        }
        state.peers.insert(entry.id.clone(), entry);
        true
    }

    /// Our half of the ownership exchange.
    fn ownership_announcement(&self) -> PeerMessage {
        let mut groups: Vec<GroupId> = self.inner.local_groups.iter().cloned().collect();
        groups.sort();
        let mut contacts: Vec<ContactId> = self.inner.local_contacts.iter().cloned().collect();
        contacts.sort();
        PeerMessage::GroupOwnership { groups, contacts }
    }

    fn compare_hash(&self, peer: &PeerId, theirs: &str, version: &str) {
        if theirs != self.inner.hash {
            // Divergence is a protocol error; resolution is policy, not ours.
            warn!(
                %peer,
                version,
                ours = %self.inner.hash,
                theirs,
                "bassline hash mismatch"
            );
            let _ = self.inner.events.send(GossipEvent::HashMismatch {
                peer: peer.clone(),
                theirs: theirs.to_string(),
            });
        }
    }

    /// Peer went away: remove it, then recompute which wires just broke.
    async fn handle_disconnect(&self, peer: &PeerId) {
        info!(%peer, "peer disconnected");
        let newly_broken = {
            let mut state = self.inner.state.write().await;
            state.peers.remove(peer);
            let live: HashSet<PeerId> = state.peers.keys().cloned().collect();
            let GossipState {
                peers,
                ownership,
                partitions,
            } = &mut *state;
            let newly_broken = partitions.detect_broken(
                &self.inner.bassline.topology,
                &self.inner.local_contacts,
                ownership,
                &live,
            );
            if !newly_broken.is_empty() {
                let msg = PeerMessage::PartitionDetected {
                    broken_wires: newly_broken.clone(),
                };
                for peer in peers.values() {
                    peer.send(msg.clone());
                }
            }
            newly_broken
        };

        let _ = self
            .inner
            .events
            .send(GossipEvent::PeerDisconnected(peer.clone()));
        if !newly_broken.is_empty() {
            warn!(wires = ?newly_broken, "wires broken by disconnect");
            let _ = self
                .inner
                .events
                .send(GossipEvent::WiresBroken(newly_broken));
        }
    }

    // --- Message handling ---

    pub async fn handle_message(&self, from: &PeerId, msg: PeerMessage) {
        match msg {
            PeerMessage::BasslineHash { hash, version, .. } => {
                self.compare_hash(from, &hash, &version);
            }
            PeerMessage::GroupOwnership { groups, contacts } => {
                self.handle_ownership(from, groups, contacts).await;
            }
            PeerMessage::ContentUpdate { contact, content } => {
                self.apply_remote_update(contact, content).await;
            }
            PeerMessage::WireSync { wire, .. } => {
                // Reserved for wire-granular reconciliation.
                debug!(%wire, %from, "ignoring wire-sync (reserved)");
            }
            PeerMessage::PartitionDetected { broken_wires } => {
                self.handle_partition_detected(from, broken_wires).await;
            }
            PeerMessage::PartitionHealed { healed_wires } => {
                let healed = {
                    let mut state = self.inner.state.write().await;
                    state.partitions.merge_healed(healed_wires)
                };
                if !healed.is_empty() {
                    info!(%from, wires = ?healed, "peer announced healed wires");
                    let _ = self.inner.events.send(GossipEvent::WiresHealed(healed));
                }
            }
            PeerMessage::SyncRequest { contacts } => {
                let updates = self.collect_local_contents(&contacts).await;
                debug!(%from, count = updates.len(), "answering sync-request");
                self.send_to(from, PeerMessage::SyncResponse { updates }).await;
            }
            PeerMessage::SyncResponse { updates } => {
                for (contact, content) in updates {
                    self.apply_remote_update(contact, content).await;
                }
            }
            PeerMessage::SubBasslineAnnounce { group, reference } => {
                info!(%from, %group, nested = %reference.id, "sub-bassline announced");
                let _ = self
                    .inner
                    .events
                    .send(GossipEvent::SubBasslineAnnounced { group, reference });
            }
        }
    }

    /// Merge a peer's ownership announcement, re-score affinity, then run
    /// the healing check — a new bridge may have just appeared.
    async fn handle_ownership(&self, from: &PeerId, groups: Vec<GroupId>, contacts: Vec<ContactId>) {
        let healed = {
            let mut state = self.inner.state.write().await;
            let contact_set: HashSet<ContactId> = contacts.iter().cloned().collect();
            let affinity = wire_affinity(
                &self.inner.bassline.topology,
                &self.inner.local_contacts,
                &contact_set,
            );
            if let Some(peer) = state.peers.get_mut(from) {
                peer.owned_groups = groups.into_iter().collect();
                peer.owned_contacts = contact_set;
                peer.wire_affinity = affinity;
                debug!(%from, affinity, "recomputed wire affinity");
            }
            state.ownership.announce(from, contacts);

            let live: HashSet<PeerId> = state.peers.keys().cloned().collect();
            let GossipState {
                ownership,
                partitions,
                ..
            } = &mut *state;
            partitions.check_healed(
                &self.inner.bassline.topology,
                &self.inner.local_contacts,
                ownership,
                &live,
            )
        };

        if !healed.is_empty() {
            info!(wires = ?healed, "partition healed");
            self.broadcast(PeerMessage::PartitionHealed {
                healed_wires: healed.clone(),
            })
            .await;
            let _ = self.inner.events.send(GossipEvent::WiresHealed(healed));
            // A fresh bridge likely carries many stale values, not just one.
            self.request_missing().await;
        }
    }

    async fn handle_partition_detected(&self, from: &PeerId, broken_wires: Vec<WireId>) {
        let (news, healed) = {
            let mut state = self.inner.state.write().await;
            let news = state.partitions.merge_announced(broken_wires);
            let live: HashSet<PeerId> = state.peers.keys().cloned().collect();
            let GossipState {
                ownership,
                partitions,
                ..
            } = &mut *state;
            let healed = partitions.check_healed(
                &self.inner.bassline.topology,
                &self.inner.local_contacts,
                ownership,
                &live,
            );
            (news, healed)
        };

        if !news.is_empty() {
            warn!(%from, wires = ?news, "peer announced broken wires");
            let _ = self.inner.events.send(GossipEvent::WiresBroken(news));
        }
        if !healed.is_empty() {
            self.broadcast(PeerMessage::PartitionHealed {
                healed_wires: healed.clone(),
            })
            .await;
            let _ = self.inner.events.send(GossipEvent::WiresHealed(healed));
            self.request_missing().await;
        }
    }

    /// Apply a remote value through the local engine, gated by the contact's
    /// declared schema.
    async fn apply_remote_update(&self, contact: ContactId, content: Value) {
        let schema_ok = {
            let engine = self.inner.engine.read().await;
            match engine.contact(&contact) {
                Some(state) => schema_accepts(&state.spec, &content),
                // Unknown contact: benign churn race, drop quietly.
                None => false,
            }
        };
        if !schema_ok {
            warn!(%contact, "remote update rejected by schema or unknown contact");
            return;
        }

        let (changed, resolved, derived) = {
            let mut engine = self.inner.engine.write().await;
            let changed = engine.schedule_update(&contact, content);
            let resolved = engine.content(&contact).cloned().unwrap_or(Value::Null);
            (changed, resolved, engine.drain_changes())
        };

        if changed {
            let _ = self.inner.events.send(GossipEvent::ContentUpdated {
                contact,
                content: resolved,
            });
        }
        for record in derived {
            let _ = self.inner.events.send(GossipEvent::ContentUpdated {
                contact: record.contact,
                content: record.content,
            });
        }
    }

    async fn collect_local_contents(&self, requested: &[ContactId]) -> BTreeMap<ContactId, Value> {
        let engine = self.inner.engine.read().await;
        requested
            .iter()
            .filter_map(|id| {
                engine
                    .content(id)
                    .filter(|v| !v.is_null())
                    .map(|v| (id.clone(), v.clone()))
            })
            .collect()
    }

    // --- Outbound ---

    /// Send to every connected peer.
    pub async fn broadcast(&self, msg: PeerMessage) {
        let state = self.inner.state.read().await;
        for peer in state.peers.values() {
            peer.send(msg.clone());
        }
    }

    pub async fn send_to(&self, peer: &PeerId, msg: PeerMessage) {
        let state = self.inner.state.read().await;
        if let Some(entry) = state.peers.get(peer) {
            entry.send(msg);
        }
    }

    /// Tell every peer about a local content change.
    pub async fn announce_content(&self, contact: &ContactId, content: &Value) {
        self.broadcast(PeerMessage::ContentUpdate {
            contact: contact.clone(),
            content: content.clone(),
        })
        .await;
    }

    /// Re-announce ownership (heartbeat timer).
    pub async fn announce_ownership(&self) {
        self.broadcast(self.ownership_announcement()).await;
    }

    /// Aggressive sync: ask everyone for every contact we are missing.
    pub async fn request_missing(&self) {
        let missing = self.inner.engine.read().await.missing_contacts();
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "requesting missing contacts");
        self.broadcast(PeerMessage::SyncRequest { contacts: missing }).await;
    }

    /// Self-detection sweep (partition-check timer).
    pub async fn check_partitions(&self) {
        let newly_broken = {
            let mut state = self.inner.state.write().await;
            let live: HashSet<PeerId> = state.peers.keys().cloned().collect();
            let GossipState {
                peers,
                ownership,
                partitions,
            } = &mut *state;
            let newly_broken = partitions.detect_broken(
                &self.inner.bassline.topology,
                &self.inner.local_contacts,
                ownership,
                &live,
            );
            if !newly_broken.is_empty() {
                let msg = PeerMessage::PartitionDetected {
                    broken_wires: newly_broken.clone(),
                };
                for peer in peers.values() {
                    peer.send(msg.clone());
                }
            }
            newly_broken
        };
        if !newly_broken.is_empty() {
            warn!(wires = ?newly_broken, "self-detected broken wires");
            let _ = self
                .inner
                .events
                .send(GossipEvent::WiresBroken(newly_broken));
        }
    }

    // --- Introspection ---

    pub async fn peer_count(&self) -> usize {
        self.inner.state.read().await.peers.len()
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.state.read().await.peers.keys().cloned().collect()
    }

    pub async fn affinity(&self, peer: &PeerId) -> Option<u32> {
        self.inner
            .state
            .read()
            .await
            .peers
            .get(peer)
            .map(|p| p.wire_affinity)
    }

    pub async fn broken_wires(&self) -> Vec<WireId> {
        self.inner
            .state
            .read()
            .await
            .partitions
            .broken_wires()
            .cloned()
            .collect()
    }

    /// Drop every connection and stop background tasks. Dropping the peer
    /// entries drops their senders, which ends the per-connection writers.
    pub async fn shutdown(&self) {
        for task in self
            .inner
            .tasks
            .lock()
            .expect("gossip tasks poisoned")
            .drain(..)
        {
            task.abort();
        }
        self.inner.state.write().await.peers.clear();
    }
}

/// Minimal schema gate: when a contact declares `{"type": "..."}` the
/// incoming value's JSON type must match. Anything richer is a declared
/// hook, not an enforced guarantee.
pub fn schema_accepts(spec: &ContactSpec, content: &Value) -> bool {
    let Some(schema) = &spec.schema else {
        return true;
    };
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return true;
    };
    let actual = match content {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    actual == expected || content.is_null()
}
