//! Filesystem backend: JSON files under a directory.
//!
//! Layout:
//!
//! ```text
//! <root>/<network>/network.json
//! <root>/<network>/groups/<group>.json
//! <root>/<network>/contacts/<contact>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use bassline_engine::{GroupState, NetworkState};
use bassline_topology::{ContactId, GroupId};

use crate::backend::StorageBackend;
use crate::error::Result;

/// File-per-record store rooted at a directory.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn network_dir(&self, network: &str) -> PathBuf {
        self.root.join(network)
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn load_network_state(&self, network: &str) -> Result<Option<NetworkState>> {
        self.read_json(&self.network_dir(network).join("network.json"))
            .await
    }

    async fn save_network_state(&self, network: &str, state: &NetworkState) -> Result<()> {
        self.write_json(&self.network_dir(network).join("network.json"), state)
            .await
    }

    async fn save_group_state(
        &self,
        network: &str,
        group: &GroupId,
        state: &GroupState,
    ) -> Result<()> {
        let path = self
            .network_dir(network)
            .join("groups")
            .join(format!("{group}.json"));
        self.write_json(&path, state).await
    }

    async fn save_contact_content(
        &self,
        network: &str,
        _group: &GroupId,
        contact: &ContactId,
        content: &Value,
    ) -> Result<()> {
        let path = self
            .network_dir(network)
            .join("contacts")
            .join(format!("{contact}.json"));
        self.write_json(&path, content).await
    }

    async fn load_contact_content(
        &self,
        network: &str,
        _group: &GroupId,
        contact: &ContactId,
    ) -> Result<Option<Value>> {
        let path = self
            .network_dir(network)
            .join("contacts")
            .join(format!("{contact}.json"));
        self.read_json(&path).await
    }

    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_network_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.initialize().await.unwrap();

        assert!(backend.load_network_state("net").await.unwrap().is_none());

        let state = NetworkState::default();
        backend.save_network_state("net", &state).await.unwrap();
        assert_eq!(
            backend.load_network_state("net").await.unwrap(),
            Some(state)
        );
    }

    #[tokio::test]
    async fn round_trips_contact_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());

        backend
            .save_contact_content("net", &"g".into(), &"c".into(), &json!({"x": [1, 2]}))
            .await
            .unwrap();
        assert_eq!(
            backend
                .load_contact_content("net", &"g".into(), &"c".into())
                .await
                .unwrap(),
            Some(json!({"x": [1, 2]}))
        );
    }
}
