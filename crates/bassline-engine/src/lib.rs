//! Bassline Engine - the per-process reactive propagation runtime.
//!
//! Holds live contact values, wires and groups; propagates value changes
//! breadth-first along wires; executes primitive gadgets over group
//! boundaries; and queues derived changes for whoever is listening. This is
//! the only component that mutates content locally — everything remote
//! arrives through the gossip layer and is applied here.

pub mod blend;
pub mod engine;
pub mod primitives;
pub mod snapshot;

pub use engine::{ChangeRecord, ContactDraft, PropagationEngine, MAX_SETTLE_ROUNDS};
pub use snapshot::{ContactState, GroupState, NetworkState};
