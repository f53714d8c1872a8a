#![forbid(unsafe_code)]
#![deny(clippy::all)]

//!
//! Sediment-core is the clock and reconciliation core of a distributed,
//! eventually-consistent column store.
//!
//! It provides the pluggable logical clocks (timestamp, increment counter,
//! signed counter), the counter-context codec, the reconcilers that merge
//! concurrent column versions, the concurrent column-family write path, the
//! read-side resolver with read repair, and the compaction-side counter
//! sanitizer. Disk formats, commit-log internals, membership, and RPC live
//! outside, behind the `CommitLog` and `RepairSink` seams.

// Shared core types: replica ids and clock-kind tags.
pub mod types;

// Error taxonomy for every fallible core operation.
pub mod error;

// Process configuration and the family-name schema registry.
pub mod config;

// Process-wide local replica identity.
pub mod identity;

// Logical clocks and the counter-context codec.
pub mod clock;

// Column-name orderings.
pub mod comparator;

// Immutable columns, super columns, and their wire codec.
pub mod column;

// Column families: the concurrent comparator-ordered map and its write loop.
pub mod family;

// Pairwise column merges.
pub mod reconcile;

// Row mutations and the write pipeline.
pub mod mutation;

// Read-response resolution and read repair.
pub mod resolve;

// Anti-entropy compaction sanitization.
pub mod compact;

pub use clock::{Clock, PartialOrder};
pub use column::{Column, ColumnEntry, SuperColumn};
pub use error::StoreError;
pub use family::{ColumnFamily, ColumnFamilyType};
pub use mutation::{CommitLog, RowMutation, Store};
pub use reconcile::Reconciler;
pub use resolve::{ReadResolver, ReadResponse, RepairSink};
pub use types::{ClockKind, NodeId};
