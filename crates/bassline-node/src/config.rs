//! Node configuration.
//!
//! Everything a node needs to join a network: identity, listen address,
//! which groups to run, timers, ceilings. `from_env` mirrors the
//! programmatic defaults for daemon deployments.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bassline_store::{FsBackend, StorageBackend};
use bassline_topology::{GroupId, PeerId};

use crate::fetcher::BasslineFetcher;

/// Which groups this node executes locally.
#[derive(Debug, Clone)]
pub enum GroupSelection {
    /// Run exactly these groups.
    Explicit(Vec<GroupId>),
    /// Pick underserved groups: no hosting endpoint declared, unowned
    /// first, skipping sub-Bassline groups.
    Auto,
}

#[derive(Clone)]
pub struct NodeConfig {
    pub peer_id: PeerId,
    /// Address to accept peers on; `None` for dial-only nodes.
    pub listen_addr: Option<SocketAddr>,
    pub groups: GroupSelection,
    /// Optional persistence; without it the node is purely in-memory.
    pub backend: Option<Arc<dyn StorageBackend>>,
    /// Resolves sub-Bassline references; required only for nested groups.
    pub fetcher: Option<Arc<dyn BasslineFetcher>>,

    /// How often to request contacts we are still missing.
    pub sync_interval: Duration,
    /// How often to re-announce our ownership to peers.
    pub heartbeat_interval: Duration,
    /// How often to run the self partition-detection sweep.
    pub partition_check_interval: Duration,
    /// Debounce window for the full-state persistence flush.
    pub persist_debounce: Duration,

    pub max_peers: usize,
    pub max_sub_networks: usize,
    /// Ceiling on serialized contact content, in bytes.
    pub max_content_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::new(format!("peer-{:08x}", rand::random::<u32>())),
            listen_addr: None,
            groups: GroupSelection::Auto,
            backend: None,
            fetcher: None,
            sync_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            partition_check_interval: Duration::from_secs(3),
            persist_debounce: Duration::from_millis(500),
            max_peers: 32,
            max_sub_networks: 8,
            max_content_size: 1024 * 1024,
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("BASSLINE_PEER_ID") {
            config.peer_id = PeerId::new(id);
        }
        if let Ok(addr) = std::env::var("BASSLINE_LISTEN_ADDR") {
            config.listen_addr = Some(addr.parse().expect("Invalid BASSLINE_LISTEN_ADDR"));
        }
        if let Ok(groups) = std::env::var("BASSLINE_GROUPS") {
            let groups: Vec<GroupId> = groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(GroupId::from)
                .collect();
            if !groups.is_empty() {
                config.groups = GroupSelection::Explicit(groups);
            }
        }
        if let Ok(dir) = std::env::var("BASSLINE_DATA_DIR") {
            config.backend = Some(Arc::new(FsBackend::new(dir)));
        }
        if let Some(ms) = env_millis("BASSLINE_SYNC_INTERVAL_MS") {
            config.sync_interval = ms;
        }
        if let Some(ms) = env_millis("BASSLINE_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = ms;
        }
        if let Some(ms) = env_millis("BASSLINE_PARTITION_CHECK_INTERVAL_MS") {
            config.partition_check_interval = ms;
        }
        if let Some(ms) = env_millis("BASSLINE_PERSIST_DEBOUNCE_MS") {
            config.persist_debounce = ms;
        }
        if let Some(n) = env_usize("BASSLINE_MAX_PEERS") {
            config.max_peers = n;
        }
        if let Some(n) = env_usize("BASSLINE_MAX_SUB_NETWORKS") {
            config.max_sub_networks = n;
        }
        if let Some(n) = env_usize("BASSLINE_MAX_CONTENT_SIZE") {
            config.max_content_size = n;
        }

        config
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .map(|v| Duration::from_millis(v.parse().unwrap_or_else(|_| panic!("Invalid {key}"))))
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .map(|v| v.parse().unwrap_or_else(|_| panic!("Invalid {key}")))
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("peer_id", &self.peer_id)
            .field("listen_addr", &self.listen_addr)
            .field("groups", &self.groups)
            .field("backend", &self.backend.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .field("sync_interval", &self.sync_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("partition_check_interval", &self.partition_check_interval)
            .field("persist_debounce", &self.persist_debounce)
            .field("max_peers", &self.max_peers)
            .field("max_sub_networks", &self.max_sub_networks)
            .field("max_content_size", &self.max_content_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = NodeConfig::default();
        assert!(matches!(config.groups, GroupSelection::Auto));
        assert!(config.backend.is_none());
        assert!(config.max_peers > 0);
        assert!(config.max_content_size > 0);
    }
}
