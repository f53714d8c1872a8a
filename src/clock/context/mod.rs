//!
//! Counter-context codec.
//!
//! A context is the byte payload of a counter clock: an 8-byte wall-clock
//! header timestamp followed by a packed vector of per-node tuples. The
//! increment-only variant packs `(id, count)` tuples; the signed variant packs
//! `(id, incr, decr)`. Update paths keep the vector in
//! most-recently-touched-first order and hold at most one tuple per id; an
//! id-sorted copy is produced on demand for comparison, and the comparison
//! walk tolerates duplicate ids in hand-assembled contexts.

mod increment;
mod standard;

pub use increment::IncrementCounterContext;
pub use standard::StandardCounterContext;

use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::PartialOrder;
use crate::error::StoreError;
use crate::types::NodeId;

/// Byte width of the leading wall-clock timestamp.
pub const HEADER_LEN: usize = 8;

/// Byte width of a single count within a tuple.
pub(crate) const COUNT_LEN: usize = 8;

pub(crate) fn wall_clock_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub(crate) fn read_i64_at(ctx: &[u8], at: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&ctx[at..at + 8]);
    i64::from_be_bytes(buf)
}

pub(crate) fn write_i64_at(ctx: &mut [u8], at: usize, value: i64) {
    ctx[at..at + 8].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn header_timestamp(ctx: &[u8]) -> i64 {
    read_i64_at(ctx, 0)
}

/// Validates the packed layout: a header plus a whole number of tuples.
pub(crate) fn check_layout(ctx: &[u8], step: usize) -> Result<(), StoreError> {
    if ctx.len() < HEADER_LEN || (ctx.len() - HEADER_LEN) % step != 0 {
        return Err(StoreError::CorruptFrame(format!(
            "counter context length {} does not fit an {HEADER_LEN}-byte header plus {step}-byte tuples",
            ctx.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_id_width(node: &NodeId, id_len: usize) -> Result<(), StoreError> {
    if node.len() != id_len {
        return Err(StoreError::Config(format!(
            "node id is {} bytes but this cluster packs {id_len}-byte ids",
            node.len()
        )));
    }
    Ok(())
}

/// One step of the relation walk: the ids paired up (with their count
/// ordering), or an id present on a single side.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pairing {
    Both(std::cmp::Ordering),
    LeftOnly,
    RightOnly,
}

/// Advances the relation state machine by one pairing.
pub(crate) fn advance(rel: PartialOrder, pairing: Pairing) -> PartialOrder {
    use std::cmp::Ordering::{Greater, Less};
    use PartialOrder::{Disjoint, Equal, GreaterThan, LessThan};

    match (rel, pairing) {
        (Equal, Pairing::Both(Greater)) | (Equal, Pairing::LeftOnly) => GreaterThan,
        (Equal, Pairing::Both(Less)) | (Equal, Pairing::RightOnly) => LessThan,
        (Equal, _) => Equal,
        (GreaterThan, Pairing::Both(Less)) | (GreaterThan, Pairing::RightOnly) => Disjoint,
        (GreaterThan, _) => GreaterThan,
        (LessThan, Pairing::Both(Greater)) | (LessThan, Pairing::LeftOnly) => Disjoint,
        (LessThan, _) => LessThan,
        (Disjoint, _) => Disjoint,
    }
}

/// Classifies two id-sorted `(id, count)` vectors by walking them in
/// lock-step. Counts are the comparison weight of a tuple; the signed variant
/// passes `incr + decr` so that disagreement is detected even when nets
/// cancel.
pub(crate) fn relate_sorted(left: &[(&[u8], i64)], right: &[(&[u8], i64)]) -> PartialOrder {
    let mut rel = PartialOrder::Equal;
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let pairing = match left[i].0.cmp(right[j].0) {
            std::cmp::Ordering::Equal => {
                let p = Pairing::Both(left[i].1.cmp(&right[j].1));
                i += 1;
                j += 1;
                p
            }
            std::cmp::Ordering::Less => {
                i += 1;
                Pairing::LeftOnly
            }
            std::cmp::Ordering::Greater => {
                j += 1;
                Pairing::RightOnly
            }
        };
        rel = advance(rel, pairing);
        if rel == PartialOrder::Disjoint {
            return rel;
        }
    }
    if i < left.len() {
        rel = advance(rel, Pairing::LeftOnly);
    }
    if j < right.len() {
        rel = advance(rel, Pairing::RightOnly);
    }
    rel
}
