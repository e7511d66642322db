//! Persistence wrapped around the propagation engine.
//!
//! Composition, not inheritance: [`PersistentEngine`] decorates a shared
//! [`PropagationEngine`] with content hashing, a debounced full-state flush
//! and immediate per-contact writes. Alternate persistence strategies swap
//! the backend, never the engine.
//!
//! Write ordering matters for backends with referential constraints: the
//! network and owning group records are ensured (idempotently, memoized per
//! group) before the first contact write that references them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use bassline_engine::{ChangeRecord, PropagationEngine};
use bassline_topology::{ContactId, GroupId};

use crate::backend::StorageBackend;
use crate::error::{Error, Result};

/// Stable content hash used for change detection and dedup: BLAKE3 over the
/// canonical JSON serialization.
pub fn content_hash(content: &Value) -> String {
    let bytes = serde_json::to_vec(content).unwrap_or_default();
    hex::encode(blake3::hash(&bytes).as_bytes())
}

#[derive(Default)]
struct PersistState {
    content_hashes: HashMap<ContactId, String>,
    ensured_network: bool,
    ensured_groups: HashSet<GroupId>,
    dirty: bool,
    debounce_task: Option<JoinHandle<()>>,
    /// First failure from a background flush; surfaced on the next `flush`.
    failed: Option<String>,
}

/// Engine decorator that keeps a storage backend in step with local state.
pub struct PersistentEngine {
    network_id: String,
    engine: Arc<RwLock<PropagationEngine>>,
    backend: Arc<dyn StorageBackend>,
    debounce: Duration,
    state: Arc<Mutex<PersistState>>,
    flush_gen: Arc<AtomicU64>,
    pending: Arc<Mutex<Vec<JoinHandle<Result<()>>>>>,
}

impl PersistentEngine {
    pub fn new(
        network_id: impl Into<String>,
        engine: Arc<RwLock<PropagationEngine>>,
        backend: Arc<dyn StorageBackend>,
        debounce: Duration,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            engine,
            backend,
            debounce,
            state: Arc::new(Mutex::new(PersistState::default())),
            flush_gen: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The shared engine this wrapper persists.
    pub fn engine(&self) -> Arc<RwLock<PropagationEngine>> {
        Arc::clone(&self.engine)
    }

    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    /// Load the last saved state into the engine, if the backend has one.
    /// Returns whether anything was restored.
    pub async fn hydrate(&self) -> Result<bool> {
        let Some(saved) = self.backend.load_network_state(&self.network_id).await? else {
            return Ok(false);
        };

        let mut state = self.state.lock().expect("persist state poisoned");
        for contact in saved.contacts.values() {
            state
                .content_hashes
                .insert(contact.spec.id.clone(), content_hash(&contact.content));
        }
        drop(state);

        self.engine.write().await.import_state(saved);
        Ok(true)
    }

    /// Update a contact through the engine, then persist the origin and every
    /// derived change. Returns whether the origin contact itself changed, and
    /// the derived change records for the caller to fan out.
    pub async fn schedule_update(
        &self,
        contact: &ContactId,
        content: Value,
    ) -> Result<(bool, Vec<ChangeRecord>)> {
        let (changed, origin, derived) = {
            let mut engine = self.engine.write().await;
            let changed = engine.schedule_update(contact, content);
            let origin = engine
                .contact(contact)
                .map(|c| (c.spec.group.clone(), c.content.clone()));
            (changed, origin, engine.drain_changes())
        };

        if !changed && derived.is_empty() {
            return Ok((false, derived));
        }

        if let Some((group, resolved)) = origin {
            if changed {
                self.persist_contact(contact, &group, &resolved).await?;
            }
        }
        for ChangeRecord {
            contact: c,
            group,
            content,
        } in &derived
        {
            self.persist_contact(c, group, content).await?;
        }

        self.mark_dirty();
        Ok((changed, derived))
    }

    /// Persist a contact's current content immediately (explicit save).
    pub async fn save_contact(&self, contact: &ContactId) -> Result<()> {
        let Some((group, content)) = ({
            let engine = self.engine.read().await;
            engine
                .contact(contact)
                .map(|c| (c.spec.group.clone(), c.content.clone()))
        }) else {
            return Ok(());
        };
        self.persist_contact(contact, &group, &content).await?;
        self.mark_dirty();
        Ok(())
    }

    /// Hash-dedup, ensure parent records, then issue a tracked write.
    async fn persist_contact(
        &self,
        contact: &ContactId,
        group: &GroupId,
        content: &Value,
    ) -> Result<()> {
        let hash = content_hash(content);
        {
            let mut state = self.state.lock().expect("persist state poisoned");
            if state.content_hashes.get(contact) == Some(&hash) {
                return Ok(());
            }
            state.content_hashes.insert(contact.clone(), hash);
        }

        if !self.backend.supports_contact_writes() {
            return Ok(());
        }

        self.ensure_parent_records(group).await?;

        let backend = Arc::clone(&self.backend);
        let network = self.network_id.clone();
        let (g, c, v) = (group.clone(), contact.clone(), content.clone());
        let handle =
            tokio::spawn(async move { backend.save_contact_content(&network, &g, &c, &v).await });
        self.pending
            .lock()
            .expect("pending writes poisoned")
            .push(handle);
        Ok(())
    }

    /// Make sure the network and group records exist before the first
    /// contact write that references them. Memoized per group.
    async fn ensure_parent_records(&self, group: &GroupId) -> Result<()> {
        let (need_network, need_group) = {
            let state = self.state.lock().expect("persist state poisoned");
            (
                !state.ensured_network,
                !state.ensured_groups.contains(group),
            )
        };

        if need_network {
            let snapshot = self.engine.read().await.export_state();
            self.backend
                .save_network_state(&self.network_id, &snapshot)
                .await?;
            self.state
                .lock()
                .expect("persist state poisoned")
                .ensured_network = true;
        }

        if need_group {
            let group_state = self.engine.read().await.get_state(group);
            if let Some(group_state) = group_state {
                self.backend
                    .save_group_state(&self.network_id, group, &group_state)
                    .await?;
            }
            self.state
                .lock()
                .expect("persist state poisoned")
                .ensured_groups
                .insert(group.clone());
        }

        Ok(())
    }

    /// Mark the full state dirty and (re)arm the debounce timer. Bursts of
    /// updates coalesce into a single flush.
    fn mark_dirty(&self) {
        let my_gen = self.flush_gen.fetch_add(1, Ordering::SeqCst) + 1;

        let engine = Arc::clone(&self.engine);
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let flush_gen = Arc::clone(&self.flush_gen);
        let network = self.network_id.clone();
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if flush_gen.load(Ordering::SeqCst) != my_gen {
                // A newer update re-armed the timer.
                return;
            }
            let snapshot = engine.read().await.export_state();
            match backend.save_network_state(&network, &snapshot).await {
                Ok(()) => {
                    debug!(network, "debounced full-state flush complete");
                    state.lock().expect("persist state poisoned").dirty = false;
                }
                Err(e) => {
                    error!(network, error = %e, "debounced flush failed");
                    let mut state = state.lock().expect("persist state poisoned");
                    state.failed.get_or_insert(e.to_string());
                }
            }
        });

        let mut state = self.state.lock().expect("persist state poisoned");
        state.dirty = true;
        if let Some(old) = state.debounce_task.replace(task) {
            old.abort();
        }
    }

    /// Record a backend failure so the next `flush()` surfaces it. For
    /// callers persisting off the update path, where the error cannot be
    /// returned inline but must still be fatal.
    pub fn record_failure(&self, error: &Error) {
        self.state
            .lock()
            .expect("persist state poisoned")
            .failed
            .get_or_insert_with(|| error.to_string());
    }

    /// Await every outstanding write and perform a final full-state save.
    /// Propagates the first backend failure — storage errors are fatal.
    pub async fn flush(&self) -> Result<()> {
        let (handles, debounce_task, failed) = {
            let mut state = self.state.lock().expect("persist state poisoned");
            let handles: Vec<_> = self
                .pending
                .lock()
                .expect("pending writes poisoned")
                .drain(..)
                .collect();
            (handles, state.debounce_task.take(), state.failed.take())
        };

        if let Some(task) = debounce_task {
            task.abort();
        }
        if let Some(message) = failed {
            return Err(Error::Storage(message));
        }

        for handle in handles {
            match handle.await {
                Ok(result) => result?,
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(Error::WriteLost(e.to_string())),
            }
        }

        let dirty = self.state.lock().expect("persist state poisoned").dirty;
        if dirty {
            let snapshot = self.engine.read().await.export_state();
            self.backend
                .save_network_state(&self.network_id, &snapshot)
                .await?;
            self.state.lock().expect("persist state poisoned").dirty = false;
        }
        Ok(())
    }

    /// Final flush, then release the backend.
    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        self.backend.close().await
    }
}
