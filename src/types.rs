//!
//! Shared core types for the store: replica identifiers and clock-kind tags.
//!
//! The wider data model (columns, families, clocks) lives in its own modules;
//! this file holds the types that cross every layer.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Raw column name bytes, ordered by the owning family's comparator.
pub type ColumnName = Vec<u8>;

/// Length of a v4 replica identifier (IPv4 address bytes).
pub const NODE_ID_LEN_V4: usize = 4;
/// Length of a v6 replica identifier (IPv6 address bytes).
pub const NODE_ID_LEN_V6: usize = 16;

/// A replica identifier: the replica's address bytes.
///
/// The length is fixed for the lifetime of a cluster (4 bytes for v4
/// deployments, 16 for v6) and every counter context in that cluster packs
/// ids of that one length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Vec<u8>);

impl NodeId {
    /// Builds an id from raw address bytes. Only the two address widths are
    /// accepted.
    pub fn new(bytes: Vec<u8>) -> Result<Self, StoreError> {
        match bytes.len() {
            NODE_ID_LEN_V4 | NODE_ID_LEN_V6 => Ok(NodeId(bytes)),
            n => Err(StoreError::Config(format!(
                "node id must be {NODE_ID_LEN_V4} or {NODE_ID_LEN_V6} bytes, got {n}"
            ))),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The id width in bytes; every context tuple in the cluster uses it.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<std::net::Ipv4Addr> for NodeId {
    fn from(addr: std::net::Ipv4Addr) -> Self {
        NodeId(addr.octets().to_vec())
    }
}

impl From<std::net::Ipv6Addr> for NodeId {
    fn from(addr: std::net::Ipv6Addr) -> Self {
        NodeId(addr.octets().to_vec())
    }
}

impl From<std::net::IpAddr> for NodeId {
    fn from(addr: std::net::IpAddr) -> Self {
        match addr {
            std::net::IpAddr::V4(v4) => v4.into(),
            std::net::IpAddr::V6(v6) => v6.into(),
        }
    }
}

/// Which clock variant a column carries. Selected by the owning family's
/// type; mixing kinds inside one family is a programming bug.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockKind {
    /// A 64-bit signed wall-clock timestamp.
    Timestamp = 0,
    /// An increment-only per-node counter context.
    IncrementCounter = 1,
    /// A signed counter context with separate increment/decrement tallies.
    StandardCounter = 2,
}

impl TryFrom<u8> for ClockKind {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClockKind::Timestamp),
            1 => Ok(ClockKind::IncrementCounter),
            2 => Ok(ClockKind::StandardCounter),
            _ => Err(StoreError::CorruptFrame(format!(
                "invalid clock kind tag: {value}"
            ))),
        }
    }
}
