//!
//! Increment-only counter contexts: `[timestamp: i64][id · count: i64]…`

use std::borrow::Cow;

use super::{
    check_id_width, check_layout, header_timestamp, read_i64_at, relate_sorted, wall_clock_millis,
    write_i64_at, COUNT_LEN, HEADER_LEN,
};
use crate::clock::PartialOrder;
use crate::error::StoreError;
use crate::identity;
use crate::types::NodeId;

/// Codec for increment-only counter contexts, parameterized on the cluster's
/// id width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementCounterContext {
    id_len: usize,
}

impl IncrementCounterContext {
    pub fn new(id_len: usize) -> Self {
        IncrementCounterContext { id_len }
    }

    /// A codec for the id width this process runs with.
    pub fn for_local() -> Result<Self, StoreError> {
        Ok(IncrementCounterContext::new(identity::id_len()?))
    }

    #[inline]
    pub fn id_len(&self) -> usize {
        self.id_len
    }

    /// Packed tuple width.
    #[inline]
    pub fn step(&self) -> usize {
        self.id_len + COUNT_LEN
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

    /// The packed `(id, count)` tuples in stored order.
    pub fn tuples<'c>(&self, ctx: &'c [u8]) -> Result<Vec<(&'c [u8], i64)>, StoreError> {
        check_layout(ctx, self.step())?;
        let step = self.step();
        let mut out = Vec::with_capacity((ctx.len() - HEADER_LEN) / step);
        let mut at = HEADER_LEN;
        while at < ctx.len() {
            out.push((&ctx[at..at + self.id_len], read_i64_at(ctx, at + self.id_len)));
            at += step;
        }
        Ok(out)
    }

    /// Applies `delta` on behalf of `node`, mutating the context in place.
    ///
    /// The header timestamp is bumped to `max(now, header)`. An existing
    /// tuple for `node` absorbs the delta and rotates to the front; a missing
    /// tuple is spliced in at the front. Callers own the buffer exclusively
    /// until the column is published.
    pub fn update(&self, ctx: &mut Vec<u8>, node: &NodeId, delta: i64) -> Result<(), StoreError> {
        check_layout(ctx, self.step())?;
        check_id_width(node, self.id_len)?;

        let now = wall_clock_millis();
        if now > header_timestamp(ctx) {
            write_i64_at(ctx, 0, now);
        }

        let step = self.step();
        match self.offset_of(ctx, node) {
            Some(at) => {
                let count_at = at + self.id_len;
                let count = read_i64_at(ctx, count_at).wrapping_add(delta);
                write_i64_at(ctx, count_at, count);
                ctx[HEADER_LEN..at + step].rotate_right(step);
            }
            None => {
                let mut tuple = Vec::with_capacity(step);
                tuple.extend_from_slice(node.as_bytes());
                tuple.extend_from_slice(&delta.to_be_bytes());
                ctx.splice(HEADER_LEN..HEADER_LEN, tuple);
            }
        }
        Ok(())
    }

    /// Classifies the per-id count vectors of two contexts.
    pub fn diff(&self, left: &[u8], right: &[u8]) -> Result<PartialOrder, StoreError> {
        let mut l = self.tuples(left)?;
        let mut r = self.tuples(right)?;
        l.sort_by(|a, b| a.0.cmp(b.0));
        r.sort_by(|a, b| a.0.cmp(b.0));
        Ok(relate_sorted(&l, &r))
    }

    /// Aggregates a set of contexts into one that dominates them all.
    ///
    /// The local node's counts sum; a remote id keeps its highest observed
    /// count (ties keep the first seen). The output tuples are sorted by
    /// count descending under the highest header timestamp.
    pub fn merge(&self, contexts: &[&[u8]], local: &NodeId) -> Result<Vec<u8>, StoreError> {
        check_id_width(local, self.id_len)?;

        let mut timestamp = i64::MIN;
        let mut local_sum: Option<i64> = None;
        let mut remotes: Vec<(&[u8], i64)> = Vec::new();

        for ctx in contexts {
            timestamp = timestamp.max(self.timestamp(ctx)?);
            for (id, count) in self.tuples(ctx)? {
                if id == local.as_bytes() {
                    let sum = local_sum.get_or_insert(0);
                    *sum = sum.wrapping_add(count);
                } else if let Some(seen) = remotes.iter_mut().find(|(seen_id, _)| *seen_id == id) {
                    if count > seen.1 {
                        seen.1 = count;
                    }
                } else {
                    remotes.push((id, count));
                }
            }
        }

        let mut tuples = remotes;
        if let Some(sum) = local_sum {
            tuples.push((local.as_bytes(), sum));
        }
        tuples.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = Vec::with_capacity(HEADER_LEN + tuples.len() * self.step());
        out.extend_from_slice(&timestamp.to_be_bytes());
        for (id, count) in tuples {
            out.extend_from_slice(id);
            out.extend_from_slice(&count.to_be_bytes());
        }
        Ok(out)
    }

    /// The counter's value: the sum over all tuples.
    pub fn total(&self, ctx: &[u8]) -> Result<i64, StoreError> {
        let mut sum = 0i64;
        for (_, count) in self.tuples(ctx)? {
            sum = sum.wrapping_add(count);
        }
        Ok(sum)
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
