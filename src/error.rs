//!
//! Defines error types for the store core.
//!
//! The propagation policy is result-or-error everywhere: the core never
//! swallows a failure. CAS loops in the write path retry locally; every other
//! failure surfaces to the caller untransformed.

use crate::clock::PartialOrder;
use crate::types::ClockKind;

/// Errors raised by the clock, reconciler, and column-family core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A length prefix is negative or exceeds the available bytes. Fatal for
    /// the frame; the caller decides whether to tear down the connection.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    /// A clock of one variant was compared or reconciled against another.
    /// A programming bug.
    #[error("clock kind mismatch: {left:?} vs {right:?}")]
    ClockKindMismatch { left: ClockKind, right: ClockKind },

    /// A reconciler met a relation the algorithm forbids (counter
    /// live-vs-delete DISJOINT). Signals a protocol regression upstream.
    #[error("impossible clock relation {relation:?} while reconciling column {column}")]
    ImpossibleRelation {
        relation: PartialOrder,
        column: String,
    },

    /// A plain column and a super column collided under the same name.
    #[error("column shape mismatch for {column}: cannot reconcile a column with a super column")]
    EntryShapeMismatch { column: String },

    /// Read responses disagree; the coordinator should retry with full data.
    #[error("digest mismatch between read responses")]
    DigestMismatch,

    /// A read fan-out produced digests only; nothing to resolve.
    #[error("no full data response to resolve")]
    NoDataResponse,

    /// Raised by external collaborators during compaction; propagated
    /// without transformation.
    #[error("insufficient disk space: {0}")]
    DiskFull(String),

    /// The process-wide local identity was set twice, or read before startup
    /// initialized it.
    #[error("local node identity error: {0}")]
    Identity(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A serialized family referenced a name the schema does not know.
    #[error("unknown column family: {0}")]
    UnknownFamily(String),

    /// An underlying reader or writer failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
