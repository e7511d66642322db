//! Bassline Topology - the data model every participant must agree on.
//!
//! A Bassline describes one logical dataflow graph: typed cells (contacts)
//! connected by propagation links (wires) and grouped into named regions
//! (groups), plus which endpoints host which groups and which groups are
//! themselves entire nested networks.
//!
//! The model is pure data with two derived operations:
//!
//! - [`Bassline::canonical_hash`] — a BLAKE3 digest over a key-sorted
//!   canonical serialization, compared between peers on connect
//! - [`Bassline::validate`] — structural validation that fails a join
//!   rather than repairing anything

pub mod bassline;
pub mod error;
pub mod ids;
pub mod reference;
pub mod topology;

pub use bassline::{Bassline, BasslineMetadata};
pub use error::{Error, Result};
pub use ids::{ContactId, GroupId, PeerId, WireId};
pub use reference::{BasslineReference, Endpoint};
pub use topology::{
    BlendMode, Boundary, ContactSpec, GroupRole, GroupSpec, Topology, WireKind, WireSpec,
};
