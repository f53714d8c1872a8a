//!
//! Signed counter contexts: `[timestamp: i64][id · incr: i64 · decr: i64]…`
//!
//! Increments and decrements are tallied separately so that two replicas
//! disagreeing by offsetting amounts still compare as disjoint: the
//! comparison weight of a tuple is `incr + decr`, while the counter value is
//! `incr - decr`.

use std::borrow::Cow;

use super::{
    check_id_width, check_layout, header_timestamp, read_i64_at, relate_sorted, wall_clock_millis,
    write_i64_at, COUNT_LEN, HEADER_LEN,
};
use crate::clock::PartialOrder;
use crate::error::StoreError;
use crate::identity;
use crate::types::NodeId;

/// One parsed `(id, incr, decr)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedTuple<'c> {
    pub id: &'c [u8],
    pub incr: i64,
    pub decr: i64,
}

impl SignedTuple<'_> {
    /// Sum of absolute contributions; the ordering weight in diff and merge.
    #[inline]
    pub fn magnitude(&self) -> i64 {
        self.incr.wrapping_add(self.decr)
    }

    /// Net contribution; what the tuple adds to the counter value.
    #[inline]
    pub fn net(&self) -> i64 {
        self.incr.wrapping_sub(self.decr)
    }
}

/// Codec for signed counter contexts, parameterized on the cluster's id
/// width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardCounterContext {
    id_len: usize,
}

impl StandardCounterContext {
    pub fn new(id_len: usize) -> Self {
        StandardCounterContext { id_len }
    }

    /// A codec for the id width this process runs with.
    pub fn for_local() -> Result<Self, StoreError> {
        Ok(StandardCounterContext::new(identity::id_len()?))
    }

    #[inline]
    pub fn id_len(&self) -> usize {
        self.id_len
    }

    /// Packed tuple width: id plus both tallies.
    #[inline]
    pub fn step(&self) -> usize {
        self.id_len + 2 * COUNT_LEN
    }

    /// A context holding just the current wall-clock timestamp.
    pub fn create(&self) -> Vec<u8> {
        self.create_at(wall_clock_millis())
    }

    pub fn create_at(&self, timestamp: i64) -> Vec<u8> {
        timestamp.to_be_bytes().to_vec()
    }

    pub fn timestamp(&self, ctx: &[u8]) -> Result<i64, StoreError> {
        check_layout(ctx, self.step())?;
        Ok(header_timestamp(ctx))
    }

    pub fn tuple_count(&self, ctx: &[u8]) -> Result<usize, StoreError> {
        check_layout(ctx, self.step())?;
        Ok((ctx.len() - HEADER_LEN) / self.step())
    }

    /// The packed tuples in stored order.
    pub fn tuples<'c>(&self, ctx: &'c [u8]) -> Result<Vec<SignedTuple<'c>>, StoreError> {
        check_layout(ctx, self.step())?;
        let step = self.step();
        let mut out = Vec::with_capacity((ctx.len() - HEADER_LEN) / step);
        let mut at = HEADER_LEN;
        while at < ctx.len() {
            out.push(SignedTuple {
                id: &ctx[at..at + self.id_len],
                incr: read_i64_at(ctx, at + self.id_len),
                decr: read_i64_at(ctx, at + self.id_len + COUNT_LEN),
            });
            at += step;
        }
        Ok(out)
    }

    /// Applies `delta` on behalf of `node`, mutating the context in place.
    ///
    /// A positive delta lands on the increment tally, a negative one adds its
    /// absolute value to the decrement tally. Placement follows the
    /// increment-only variant: touched tuples rotate to the front, new ones
    /// splice in at the front.
    pub fn update(&self, ctx: &mut Vec<u8>, node: &NodeId, delta: i64) -> Result<(), StoreError> {
        check_layout(ctx, self.step())?;
        check_id_width(node, self.id_len)?;

        let now = wall_clock_millis();
        if now > header_timestamp(ctx) {
            write_i64_at(ctx, 0, now);
        }

        let (incr, decr) = if delta >= 0 {
            (delta, 0)
        } else {
            (0, delta.unsigned_abs() as i64)
        };

        let step = self.step();
        match self.offset_of(ctx, node) {
            Some(at) => {
                let incr_at = at + self.id_len;
                let decr_at = incr_at + COUNT_LEN;
                let new_incr = read_i64_at(ctx, incr_at).wrapping_add(incr);
                write_i64_at(ctx, incr_at, new_incr);
                let new_decr = read_i64_at(ctx, decr_at).wrapping_add(decr);
                write_i64_at(ctx, decr_at, new_decr);
                ctx[HEADER_LEN..at + step].rotate_right(step);
            }
            None => {
                let mut tuple = Vec::with_capacity(step);
                tuple.extend_from_slice(node.as_bytes());
                tuple.extend_from_slice(&incr.to_be_bytes());
                tuple.extend_from_slice(&decr.to_be_bytes());
                ctx.splice(HEADER_LEN..HEADER_LEN, tuple);
            }
        }
        Ok(())
    }

    /// Classifies the per-id tallies of two contexts. The weight of a tuple
    /// is its magnitude, not its net, so offsetting disagreement still reads
    /// as disjoint.
    pub fn diff(&self, left: &[u8], right: &[u8]) -> Result<PartialOrder, StoreError> {
        let mut l: Vec<(&[u8], i64)> = self
            .tuples(left)?
            .iter()
            .map(|t| (t.id, t.magnitude()))
            .collect();
        let mut r: Vec<(&[u8], i64)> = self
            .tuples(right)?
            .iter()
            .map(|t| (t.id, t.magnitude()))
            .collect();
        l.sort_by(|a, b| a.0.cmp(b.0));
        r.sort_by(|a, b| a.0.cmp(b.0));
        Ok(relate_sorted(&l, &r))
    }

    /// Aggregates a set of contexts into one that dominates them all.
    ///
    /// The local node's increment and decrement tallies sum separately; a
    /// remote id keeps the tuple with the highest magnitude (ties keep the
    /// first seen). Output tuples are sorted by magnitude descending under
    /// the highest header timestamp.
    pub fn merge(&self, contexts: &[&[u8]], local: &NodeId) -> Result<Vec<u8>, StoreError> {
        check_id_width(local, self.id_len)?;

        let mut timestamp = i64::MIN;
        let mut local_sums: Option<(i64, i64)> = None;
        let mut remotes: Vec<SignedTuple<'_>> = Vec::new();

        for ctx in contexts {
            timestamp = timestamp.max(self.timestamp(ctx)?);
            for tuple in self.tuples(ctx)? {
                if tuple.id == local.as_bytes() {
                    let sums = local_sums.get_or_insert((0, 0));
                    sums.0 = sums.0.wrapping_add(tuple.incr);
                    sums.1 = sums.1.wrapping_add(tuple.decr);
                } else if let Some(seen) = remotes.iter_mut().find(|seen| seen.id == tuple.id) {
                    if tuple.magnitude() > seen.magnitude() {
                        seen.incr = tuple.incr;
                        seen.decr = tuple.decr;
                    }
                } else {
                    remotes.push(tuple);
                }
            }
        }

        let mut tuples = remotes;
        if let Some((incr, decr)) = local_sums {
            tuples.push(SignedTuple {
                id: local.as_bytes(),
                incr,
                decr,
            });
        }
        tuples.sort_by(|a, b| b.magnitude().cmp(&a.magnitude()));

        let mut out = Vec::with_capacity(HEADER_LEN + tuples.len() * self.step());
        out.extend_from_slice(&timestamp.to_be_bytes());
        for tuple in tuples {
            out.extend_from_slice(tuple.id);
            out.extend_from_slice(&tuple.incr.to_be_bytes());
            out.extend_from_slice(&tuple.decr.to_be_bytes());
        }
        Ok(out)
    }

    /// The counter's value: the sum of nets over all tuples.
    pub fn total(&self, ctx: &[u8]) -> Result<i64, StoreError> {
        let mut sum = 0i64;
        for tuple in self.tuples(ctx)? {
            sum = sum.wrapping_add(tuple.net());
        }
        Ok(sum)
    }

    /// Summed increment and decrement tallies across all tuples.
    pub fn total_magnitudes(&self, ctx: &[u8]) -> Result<(i64, i64), StoreError> {
        let mut sums = (0i64, 0i64);
        for tuple in self.tuples(ctx)? {
            sums.0 = sums.0.wrapping_add(tuple.incr);
            sums.1 = sums.1.wrapping_add(tuple.decr);
        }
        Ok(sums)
    }

    /// The value as the 8-byte big-endian column payload.
    pub fn total_bytes(&self, ctx: &[u8]) -> Result<[u8; 8], StoreError> {
        Ok(self.total(ctx)?.to_be_bytes())
    }

    /// Returns a copy with `node`'s tuple removed, or the original when the
    /// id is absent.
    pub fn clean_node_counts<'c>(
        &self,
        ctx: &'c [u8],
        node: &NodeId,
    ) -> Result<Cow<'c, [u8]>, StoreError> {
        check_layout(ctx, self.step())?;
        check_id_width(node, self.id_len)?;
        match self.offset_of(ctx, node) {
            None => Ok(Cow::Borrowed(ctx)),
            Some(at) => {
                let mut out = Vec::with_capacity(ctx.len() - self.step());
                out.extend_from_slice(&ctx[..at]);
                out.extend_from_slice(&ctx[at + self.step()..]);
                Ok(Cow::Owned(out))
            }
        }
    }

    fn offset_of(&self, ctx: &[u8], node: &NodeId) -> Option<usize> {
        let step = self.step();
        let mut at = HEADER_LEN;
        while at < ctx.len() {
            if &ctx[at..at + self.id_len] == node.as_bytes() {
                return Some(at);
            }
            at += step;
        }
        None
    }
}
