//! Bassline Node - composes a full participant out of the other crates.
//!
//! A node joins one Bassline: it validates the definition, runs the
//! propagation engine for its local groups, persists through an optional
//! storage backend, gossips with the peers hosting the remaining groups,
//! and recursively hosts nested sub-Basslines. Outer layers observe it
//! through a broadcast stream of [`NodeEvent`]s.

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod node;
mod sub;

pub use config::{GroupSelection, NodeConfig};
pub use error::{Error, Result};
pub use events::NodeEvent;
pub use fetcher::{BasslineFetcher, StaticFetcher};
pub use node::BasslineNode;
