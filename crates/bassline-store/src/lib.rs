//! Bassline Store - pluggable persistence for engine state.
//!
//! The engine itself knows nothing about durability. This crate provides the
//! narrow [`StorageBackend`] contract any store must satisfy, two concrete
//! backends (memory and filesystem), and [`PersistentEngine`] — a decorator
//! that hashes content for dedup, debounces full-state flushes, and issues
//! immediate per-contact writes when the backend supports them.

pub mod backend;
pub mod error;
pub mod fs;
pub mod memory;
pub mod persist;

pub use backend::StorageBackend;
pub use error::{Error, Result};
pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use persist::{content_hash, PersistentEngine};
