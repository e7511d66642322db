//! In-memory backend.
//!
//! The default for tests and for nodes that opt out of durability. Records
//! the order of operations so tests can assert write ordering (network and
//! group records before the contacts that reference them).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use bassline_engine::{GroupState, NetworkState};
use bassline_topology::{ContactId, GroupId};

use crate::backend::StorageBackend;
use crate::error::Result;

#[derive(Default)]
struct Inner {
    networks: HashMap<String, NetworkState>,
    groups: HashMap<(String, GroupId), GroupState>,
    contacts: HashMap<(String, GroupId, ContactId), Value>,
    /// Operation log, e.g. `save-group:net/g1`, for ordering assertions.
    ops: Vec<String>,
}

/// Memory-backed store.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded operation log (test support).
    pub fn operations(&self) -> Vec<String> {
        self.inner.lock().expect("memory backend poisoned").ops.clone()
    }

    /// Number of distinct contacts ever written.
    pub fn contact_write_count(&self) -> usize {
        self.inner.lock().expect("memory backend poisoned").contacts.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load_network_state(&self, network: &str) -> Result<Option<NetworkState>> {
        let inner = self.inner.lock().expect("memory backend poisoned");
        Ok(inner.networks.get(network).cloned())
    }

    async fn save_network_state(&self, network: &str, state: &NetworkState) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory backend poisoned");
        inner.ops.push(format!("save-network:{network}"));
        inner.networks.insert(network.to_string(), state.clone());
        Ok(())
    }

    async fn save_group_state(
        &self,
        network: &str,
        group: &GroupId,
        state: &GroupState,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory backend poisoned");
        inner.ops.push(format!("save-group:{network}/{group}"));
        inner
            .groups
            .insert((network.to_string(), group.clone()), state.clone());
        Ok(())
    }

    async fn save_contact_content(
        &self,
        network: &str,
        group: &GroupId,
        contact: &ContactId,
        content: &Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory backend poisoned");
        inner
            .ops
            .push(format!("save-contact:{network}/{group}/{contact}"));
        inner.contacts.insert(
            (network.to_string(), group.clone(), contact.clone()),
            content.clone(),
        );
        Ok(())
    }

    async fn load_contact_content(
        &self,
        network: &str,
        group: &GroupId,
        contact: &ContactId,
    ) -> Result<Option<Value>> {
        let inner = self.inner.lock().expect("memory backend poisoned");
        Ok(inner
            .contacts
            .get(&(network.to_string(), group.clone(), contact.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_contact_content() {
        let backend = MemoryBackend::new();
        let group = GroupId::new("g");
        let contact = ContactId::new("c");

        assert_eq!(
            backend.load_contact_content("net", &group, &contact).await.unwrap(),
            None
        );

        backend
            .save_contact_content("net", &group, &contact, &json!(42))
            .await
            .unwrap();
        assert_eq!(
            backend.load_contact_content("net", &group, &contact).await.unwrap(),
            Some(json!(42))
        );
    }

    #[tokio::test]
    async fn records_operation_order() {
        let backend = MemoryBackend::new();
        backend
            .save_network_state("net", &NetworkState::default())
            .await
            .unwrap();
        backend
            .save_contact_content("net", &"g".into(), &"c".into(), &json!(1))
            .await
            .unwrap();
        assert_eq!(
            backend.operations(),
            vec!["save-network:net", "save-contact:net/g/c"]
        );
    }
}
