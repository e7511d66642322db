//! Resolving sub-Bassline references.
//!
//! How a referenced Bassline is actually obtained (HTTP, content-addressed
//! store, registry) is outside this crate; nodes take the mechanism as a
//! trait object. [`StaticFetcher`] is the in-memory implementation used by
//! tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use bassline_topology::{Bassline, BasslineReference};

use crate::error::{Error, Result};

#[async_trait]
pub trait BasslineFetcher: Send + Sync {
    /// Resolve a reference to a full Bassline definition.
    async fn fetch(&self, reference: &BasslineReference) -> Result<Bassline>;
}

/// Fetcher over a fixed set of known Basslines, keyed by id.
#[derive(Default)]
pub struct StaticFetcher {
    known: Mutex<HashMap<String, Bassline>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bassline: Bassline) {
        self.known
            .lock()
            .expect("fetcher map poisoned")
            .insert(bassline.id.clone(), bassline);
    }
}

#[async_trait]
impl BasslineFetcher for StaticFetcher {
    async fn fetch(&self, reference: &BasslineReference) -> Result<Bassline> {
        let bassline = self
            .known
            .lock()
            .expect("fetcher map poisoned")
            .get(&reference.id)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("unknown bassline: {}", reference.id)))?;

        // Content-addressed references must match what we resolved.
        if let Some(expected) = &reference.content_hash {
            let actual = bassline.canonical_hash();
            if &actual != expected {
                return Err(Error::Fetch(format!(
                    "content hash mismatch for {}: expected {expected}, got {actual}",
                    reference.id
                )));
            }
        }
        Ok(bassline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bassline_topology::{ContactSpec, GroupSpec, Topology};

    fn tiny_bassline(id: &str) -> Bassline {
        let mut topology = Topology::default();
        topology.groups.insert("g".into(), GroupSpec::container("g", "g"));
        topology
            .contacts
            .insert("c".into(), ContactSpec::new("c", "g"));
        Bassline::new(id, "1.0.0", topology)
    }

    #[tokio::test]
    async fn fetch_by_id() {
        let fetcher = StaticFetcher::new();
        fetcher.insert(tiny_bassline("nested"));

        let found = fetcher
            .fetch(&BasslineReference::by_id("nested"))
            .await
            .unwrap();
        assert_eq!(found.id, "nested");

        let missing = fetcher.fetch(&BasslineReference::by_id("absent")).await;
        assert!(matches!(missing, Err(Error::Fetch(_))));
    }

    #[tokio::test]
    async fn fetch_checks_content_hash() {
        let fetcher = StaticFetcher::new();
        let bassline = tiny_bassline("nested");
        let good_hash = bassline.canonical_hash();
        fetcher.insert(bassline);

        let mut reference = BasslineReference::by_id("nested");
        reference.content_hash = Some(good_hash);
        assert!(fetcher.fetch(&reference).await.is_ok());

        reference.content_hash = Some("deadbeef".into());
        assert!(matches!(
            fetcher.fetch(&reference).await,
            Err(Error::Fetch(_))
        ));
    }
}
