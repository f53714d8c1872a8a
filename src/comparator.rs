//!
//! Column-name comparators.
//!
//! Every column family orders its columns by a user-specified comparator.
//! The map in `family` stores entries sorted by it; resolvers and codecs walk
//! entries in that order so digests and merges agree across replicas.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::StoreError;

/// Total order over raw column names.
pub trait NameComparator: Send + Sync + std::fmt::Debug {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// The name this comparator registers under in configuration.
    fn label(&self) -> &'static str;
}

/// Plain lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesComparator;

impl NameComparator for BytesComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn label(&self) -> &'static str {
        "bytes"
    }
}

/// Orders names as 8-byte big-endian signed integers; shorter names sort
/// before well-formed ones, byte order breaks ties among malformed names.
#[derive(Debug, Default, Clone, Copy)]
pub struct LongComparator;

impl NameComparator for LongComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (decode_long(a), decode_long(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => a.cmp(b),
        }
    }

    fn label(&self) -> &'static str {
        "long"
    }
}

fn decode_long(name: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = name.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

/// Looks a comparator up by its configuration label.
pub fn by_label(label: &str) -> Result<Arc<dyn NameComparator>, StoreError> {
    match label {
        "bytes" => Ok(Arc::new(BytesComparator)),
        "long" => Ok(Arc::new(LongComparator)),
        other => Err(StoreError::Config(format!(
            "unknown comparator: {other:?}"
        ))),
    }
}
