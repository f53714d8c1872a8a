//!
//! Logical clocks: the recency/causality token attached to every column.
//!
//! Three variants share one interface: a scalar timestamp, an increment-only
//! counter, and a signed counter. Algorithms stay data-directed: every
//! operation dispatches on the variant pair and rejects mixed kinds loudly.

pub mod context;

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::StoreError;
use crate::identity;
use crate::types::ClockKind;
use context::{IncrementCounterContext, StandardCounterContext};

/// The four-valued recency relation between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialOrder {
    LessThan,
    GreaterThan,
    Equal,
    /// Neither side dominates; the clocks observed concurrent histories.
    Disjoint,
}

#[inline]
fn order_of(ord: std::cmp::Ordering) -> PartialOrder {
    match ord {
        std::cmp::Ordering::Less => PartialOrder::LessThan,
        std::cmp::Ordering::Equal => PartialOrder::Equal,
        std::cmp::Ordering::Greater => PartialOrder::GreaterThan,
    }
}

/// A column's clock. Counter variants carry their raw context bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clock {
    Timestamp(i64),
    IncrementCounter(Vec<u8>),
    StandardCounter(Vec<u8>),
}

impl Clock {
    #[inline]
    pub fn kind(&self) -> ClockKind {
        match self {
            Clock::Timestamp(_) => ClockKind::Timestamp,
            Clock::IncrementCounter(_) => ClockKind::IncrementCounter,
            Clock::StandardCounter(_) => ClockKind::StandardCounter,
        }
    }

    /// The default minimum clock of a kind, used to initialize tombstones.
    /// Counter minimums are a bare `i64::MIN` header with no tuples.
    pub fn minimum(kind: ClockKind) -> Clock {
        match kind {
            ClockKind::Timestamp => Clock::Timestamp(i64::MIN),
            ClockKind::IncrementCounter => {
                Clock::IncrementCounter(i64::MIN.to_be_bytes().to_vec())
            }
            ClockKind::StandardCounter => Clock::StandardCounter(i64::MIN.to_be_bytes().to_vec()),
        }
    }

    /// The raw counter context, when this is a counter clock.
    pub fn context(&self) -> Option<&[u8]> {
        match self {
            Clock::Timestamp(_) => None,
            Clock::IncrementCounter(ctx) | Clock::StandardCounter(ctx) => Some(ctx),
        }
    }

    fn mismatch(&self, other: &Clock) -> StoreError {
        StoreError::ClockKindMismatch {
            left: self.kind(),
            right: other.kind(),
        }
    }

    /// The recency order used for tombstone-vs-live decisions and
    /// last-writer-wins. Counter variants compare header timestamps only, so
    /// `Disjoint` is unreachable for them here.
    pub fn compare(&self, other: &Clock) -> Result<PartialOrder, StoreError> {
        match (self, other) {
            (Clock::Timestamp(a), Clock::Timestamp(b)) => Ok(order_of(a.cmp(b))),
            (Clock::IncrementCounter(a), Clock::IncrementCounter(b)) => {
                let codec = IncrementCounterContext::for_local()?;
                Ok(order_of(codec.timestamp(a)?.cmp(&codec.timestamp(b)?)))
            }
            (Clock::StandardCounter(a), Clock::StandardCounter(b)) => {
                let codec = StandardCounterContext::for_local()?;
                Ok(order_of(codec.timestamp(a)?.cmp(&codec.timestamp(b)?)))
            }
            _ => Err(self.mismatch(other)),
        }
    }

    /// The information order over the counter vectors, used to decide whether
    /// a replica's column is missing information relative to a reference.
    /// Coincides with `compare` for timestamps.
    pub fn diff(&self, other: &Clock) -> Result<PartialOrder, StoreError> {
        match (self, other) {
            (Clock::Timestamp(_), Clock::Timestamp(_)) => self.compare(other),
            (Clock::IncrementCounter(a), Clock::IncrementCounter(b)) => {
                IncrementCounterContext::for_local()?.diff(a, b)
            }
            (Clock::StandardCounter(a), Clock::StandardCounter(b)) => {
                StandardCounterContext::for_local()?.diff(a, b)
            }
            _ => Err(self.mismatch(other)),
        }
    }

    /// The clock join: a merge that dominates all inputs.
    pub fn superset(clocks: &[&Clock]) -> Result<Clock, StoreError> {
        let first = *clocks
            .first()
            .ok_or_else(|| StoreError::Config("superset of an empty clock set".to_string()))?;
        for clock in clocks {
            if clock.kind() != first.kind() {
                return Err(first.mismatch(clock));
            }
        }
        match first {
            Clock::Timestamp(_) => {
                let mut max = i64::MIN;
                for clock in clocks {
                    if let Clock::Timestamp(ts) = clock {
                        max = max.max(*ts);
                    }
                }
                Ok(Clock::Timestamp(max))
            }
            Clock::IncrementCounter(_) => {
                let contexts = collect_contexts(clocks);
                let codec = IncrementCounterContext::for_local()?;
                Ok(Clock::IncrementCounter(
                    codec.merge(&contexts, identity::local()?)?,
                ))
            }
            Clock::StandardCounter(_) => {
                let contexts = collect_contexts(clocks);
                let codec = StandardCounterContext::for_local()?;
                Ok(Clock::StandardCounter(
                    codec.merge(&contexts, identity::local()?)?,
                ))
            }
        }
    }

    /// Exact byte count produced by `serialize`.
    pub fn size(&self) -> usize {
        match self {
            Clock::Timestamp(_) => 8,
            Clock::IncrementCounter(ctx) | Clock::StandardCounter(ctx) => 4 + ctx.len(),
        }
    }

    /// Length-prefixed wire encoding: timestamps as a bare big-endian i64,
    /// counters as an i32 length followed by the raw context bytes.
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        match self {
            Clock::Timestamp(ts) => w.write_i64::<BigEndian>(*ts)?,
            Clock::IncrementCounter(ctx) | Clock::StandardCounter(ctx) => {
                if ctx.len() > i32::MAX as usize {
                    return Err(StoreError::CorruptFrame(format!(
                        "counter context of {} bytes exceeds the frame limit",
                        ctx.len()
                    )));
                }
                w.write_i32::<BigEndian>(ctx.len() as i32)?;
                w.write_all(ctx)?;
            }
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(kind: ClockKind, r: &mut R) -> Result<Clock, StoreError> {
        match kind {
            ClockKind::Timestamp => Ok(Clock::Timestamp(r.read_i64::<BigEndian>()?)),
            ClockKind::IncrementCounter => Ok(Clock::IncrementCounter(read_context(r)?)),
            ClockKind::StandardCounter => Ok(Clock::StandardCounter(read_context(r)?)),
        }
    }

    pub fn serialized(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::with_capacity(self.size());
        self.serialize(&mut out)?;
        Ok(out)
    }
}

fn collect_contexts<'c>(clocks: &[&'c Clock]) -> Vec<&'c [u8]> {
    clocks.iter().filter_map(|clock| clock.context()).collect()
}

fn read_context<R: Read>(r: &mut R) -> Result<Vec<u8>, StoreError> {
    let len = r.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(StoreError::CorruptFrame(format!(
            "negative counter context length: {len}"
        )));
    }
    let mut ctx = vec![0u8; len as usize];
    r.read_exact(&mut ctx).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::CorruptFrame(format!("counter context truncated before {len} bytes"))
        } else {
            err.into()
        }
    })?;
    Ok(ctx)
}
