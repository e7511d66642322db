//! The narrow contract a storage backend must satisfy.
//!
//! The engine only ever needs this surface; memory, filesystem and database
//! backends all sit behind it. Per-contact writes are optional — backends
//! that only take full-state saves report it through
//! [`StorageBackend::supports_contact_writes`].

use async_trait::async_trait;
use serde_json::Value;

use bassline_engine::{GroupState, NetworkState};
use bassline_topology::{ContactId, GroupId};

use crate::error::Result;

/// Pluggable store for network, group and contact state.
///
/// The concurrency contract is "last full-state save wins, per-contact saves
/// are independent": no cross-process locking is assumed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load the last saved full state for a network, if any.
    async fn load_network_state(&self, network: &str) -> Result<Option<NetworkState>>;

    /// Replace the full saved state for a network.
    async fn save_network_state(&self, network: &str, state: &NetworkState) -> Result<()>;

    /// Save one group's state (also serves as the "group record exists"
    /// marker for backends with referential constraints).
    async fn save_group_state(&self, network: &str, group: &GroupId, state: &GroupState)
        -> Result<()>;

    /// Save one contact's content.
    async fn save_contact_content(
        &self,
        network: &str,
        group: &GroupId,
        contact: &ContactId,
        content: &Value,
    ) -> Result<()>;

    /// Load one contact's content; `None` when nothing was ever saved.
    async fn load_contact_content(
        &self,
        network: &str,
        group: &GroupId,
        contact: &ContactId,
    ) -> Result<Option<Value>>;

    /// Whether the backend accepts per-contact writes at all.
    fn supports_contact_writes(&self) -> bool {
        true
    }

    /// Optional lifecycle hook, called once before first use.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Optional lifecycle hook, called at shutdown after the final flush.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
