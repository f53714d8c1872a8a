//!
//! Reconcilers: pure pairwise merges over two columns sharing a name.
//!
//! Each family type designates one reconciler. Tombstones win ties on every
//! code path.

use crate::clock::context::{IncrementCounterContext, StandardCounterContext};
use crate::clock::{Clock, PartialOrder};
use crate::column::{display_name, Column, ColumnEntry, SuperColumn};
use crate::comparator::NameComparator;
use crate::error::StoreError;

/// Precedence of a counter tombstone against a live column whose clock ties
/// with it. The deletion semantics for counters are still settling
/// upstream; the knob keeps the decision in one place. Only the
/// tombstone-wins rule ships.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterDeletePolicy {
    #[default]
    TombstoneWinsTies,
}

/// The merge function a column family applies to same-name collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciler {
    /// Last-writer-wins over timestamp clocks.
    LastWrite,
    /// Version-vector columns: concurrent live values concatenate.
    Concatenating,
    /// Counter columns: the clock join carries the value.
    IncrementCounter(CounterDeletePolicy),
}

impl Reconciler {
    /// Merges two same-name columns into their causally correct result.
    pub fn reconcile(&self, left: &Column, right: &Column) -> Result<Column, StoreError> {
        match self {
            Reconciler::LastWrite => last_write(left, right),
            Reconciler::Concatenating => concatenating(left, right),
            Reconciler::IncrementCounter(policy) => increment_counter(left, right, *policy),
        }
    }

    /// Entry-level merge: plain columns reconcile, super columns merge their
    /// subcolumns under the same reconciler.
    pub fn reconcile_entries(
        &self,
        left: &ColumnEntry,
        right: &ColumnEntry,
        comparator: &dyn NameComparator,
    ) -> Result<ColumnEntry, StoreError> {
        match (left, right) {
            (ColumnEntry::Column(l), ColumnEntry::Column(r)) => {
                Ok(ColumnEntry::Column(self.reconcile(l, r)?))
            }
            (ColumnEntry::Super(l), ColumnEntry::Super(r)) => {
                Ok(ColumnEntry::Super(self.merge_super(l, r, comparator)?))
            }
            _ => Err(StoreError::EntryShapeMismatch {
                column: display_name(left.name()),
            }),
        }
    }

    /// Merges two super columns: tombstone pair under atomic max, subcolumn
    /// lists merged pairwise.
    pub fn merge_super(
        &self,
        left: &SuperColumn,
        right: &SuperColumn,
        comparator: &dyn NameComparator,
    ) -> Result<SuperColumn, StoreError> {
        let mut merged = SuperColumn::from_parts(
            left.name().to_vec(),
            left.marked_for_delete_at().clone(),
            left.local_deletion_time(),
            Vec::new(),
        );
        merged.delete(right.marked_for_delete_at(), right.local_deletion_time())?;

        let (l, r) = (left.columns(), right.columns());
        let (mut i, mut j) = (0, 0);
        while i < l.len() && j < r.len() {
            match comparator.compare(l[i].name(), r[j].name()) {
                std::cmp::Ordering::Less => {
                    merged.push_column(l[i].clone());
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push_column(r[j].clone());
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push_column(self.reconcile(&l[i], &r[j])?);
                    i += 1;
                    j += 1;
                }
            }
        }
        for column in &l[i..] {
            merged.push_column(column.clone());
        }
        for column in &r[j..] {
            merged.push_column(column.clone());
        }
        Ok(merged)
    }
}

fn later_tombstone(left: &Column, right: &Column) -> Column {
    let l = left.local_deletion_time().unwrap_or(i32::MIN);
    let r = right.local_deletion_time().unwrap_or(i32::MIN);
    if l >= r {
        left.clone()
    } else {
        right.clone()
    }
}

fn last_write(left: &Column, right: &Column) -> Result<Column, StoreError> {
    match left.clock().compare(right.clock())? {
        PartialOrder::GreaterThan => Ok(left.clone()),
        PartialOrder::LessThan => Ok(right.clone()),
        PartialOrder::Equal => Ok(match (left.is_deleted(), right.is_deleted()) {
            // Tombstones win ties.
            (true, false) => left.clone(),
            (false, true) => right.clone(),
            (true, true) => later_tombstone(left, right),
            // Value bytes break live ties deterministically across replicas.
            (false, false) => {
                if left.value() >= right.value() {
                    left.clone()
                } else {
                    right.clone()
                }
            }
        }),
        PartialOrder::Disjoint => Err(StoreError::ImpossibleRelation {
            relation: PartialOrder::Disjoint,
            column: display_name(left.name()),
        }),
    }
}

fn concatenating(left: &Column, right: &Column) -> Result<Column, StoreError> {
    let clock = Clock::superset(&[left.clock(), right.clock()])?;
    match (left.is_deleted(), right.is_deleted()) {
        (false, false) => {
            let mut value = Vec::with_capacity(left.value().len() + right.value().len());
            value.extend_from_slice(left.value());
            value.extend_from_slice(right.value());
            Ok(Column::live(left.name().to_vec(), value, clock))
        }
        (false, true) => Ok(Column::live(left.name().to_vec(), left.value().to_vec(), clock)),
        (true, false) => Ok(Column::live(
            left.name().to_vec(),
            right.value().to_vec(),
            clock,
        )),
        (true, true) => {
            let later = later_tombstone(left, right);
            Ok(Column::tombstone(
                left.name().to_vec(),
                clock,
                later.local_deletion_time().unwrap_or(i32::MIN),
            ))
        }
    }
}

/// The value of a counter column: `total` over its merged context.
fn counter_value(clock: &Clock) -> Result<Vec<u8>, StoreError> {
    match clock {
        Clock::IncrementCounter(ctx) => Ok(IncrementCounterContext::for_local()?
            .total_bytes(ctx)?
            .to_vec()),
        Clock::StandardCounter(ctx) => Ok(StandardCounterContext::for_local()?
            .total_bytes(ctx)?
            .to_vec()),
        Clock::Timestamp(_) => Err(StoreError::ClockKindMismatch {
            left: crate::types::ClockKind::IncrementCounter,
            right: clock.kind(),
        }),
    }
}

fn increment_counter(
    left: &Column,
    right: &Column,
    policy: CounterDeletePolicy,
) -> Result<Column, StoreError> {
    match (left.is_deleted(), right.is_deleted()) {
        (false, false) => {
            let clock = Clock::superset(&[left.clock(), right.clock()])?;
            let value = counter_value(&clock)?;
            Ok(Column::live(left.name().to_vec(), value, clock))
        }
        (false, true) => counter_tombstone_vs_live(left, right, policy),
        (true, false) => counter_tombstone_vs_live(right, left, policy),
        (true, true) => {
            let clock = Clock::superset(&[left.clock(), right.clock()])?;
            let later = later_tombstone(left, right);
            Ok(Column::tombstone(
                left.name().to_vec(),
                clock,
                later.local_deletion_time().unwrap_or(i32::MIN),
            ))
        }
    }
}

fn counter_tombstone_vs_live(
    live: &Column,
    dead: &Column,
    policy: CounterDeletePolicy,
) -> Result<Column, StoreError> {
    match dead.clock().compare(live.clock())? {
        PartialOrder::GreaterThan => Ok(dead.clone()),
        PartialOrder::Equal => match policy {
            CounterDeletePolicy::TombstoneWinsTies => Ok(dead.clone()),
        },
        PartialOrder::LessThan => Ok(live.clone()),
        // Counter recency is a header-timestamp order; a disjoint outcome
        // here means a protocol regression upstream.
        PartialOrder::Disjoint => Err(StoreError::ImpossibleRelation {
            relation: PartialOrder::Disjoint,
            column: display_name(live.name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use crate::types::NodeId;

    fn node(n: u32) -> NodeId {
        NodeId::new(n.to_be_bytes().to_vec()).unwrap()
    }

    #[test]
    fn last_write_picks_the_newer_column() {
        let old = Column::live(b"c".to_vec(), b"old".to_vec(), Clock::Timestamp(1));
        let new = Column::live(b"c".to_vec(), b"new".to_vec(), Clock::Timestamp(2));
        let merged = Reconciler::LastWrite.reconcile(&old, &new).unwrap();
        assert_eq!(merged, new);
    }

    #[test]
    fn last_write_tombstone_absorbs_older_live() {
        let live = Column::live(b"c".to_vec(), b"v".to_vec(), Clock::Timestamp(5));
        let dead = Column::tombstone(b"c".to_vec(), Clock::Timestamp(9), 100);
        let merged = Reconciler::LastWrite.reconcile(&live, &dead).unwrap();
        assert!(merged.is_deleted());

        // And wins the tie at equal clocks.
        let tied = Column::tombstone(b"c".to_vec(), Clock::Timestamp(5), 100);
        let merged = Reconciler::LastWrite.reconcile(&live, &tied).unwrap();
        assert!(merged.is_deleted());
    }

    #[test]
    fn last_write_is_idempotent() {
        let column = Column::live(b"c".to_vec(), b"v".to_vec(), Clock::Timestamp(3));
        let merged = Reconciler::LastWrite.reconcile(&column, &column).unwrap();
        assert_eq!(merged, column);
    }

    #[test]
    fn concatenating_joins_concurrent_live_values() {
        identity::initialize_for_tests();
        let codec = StandardCounterContext::for_local().unwrap();

        let mut lc = codec.create_at(1);
        codec.update(&mut lc, &node(1), 1).unwrap();
        let mut rc = codec.create_at(1);
        codec.update(&mut rc, &node(2), 1).unwrap();

        let left = Column::live(b"c".to_vec(), b"ab".to_vec(), Clock::StandardCounter(lc));
        let right = Column::live(b"c".to_vec(), b"cd".to_vec(), Clock::StandardCounter(rc));
        let merged = Reconciler::Concatenating.reconcile(&left, &right).unwrap();
        assert_eq!(merged.value(), b"abcd");
        assert!(!merged.is_deleted());

        // live + deleted keeps the live value under the joined clock.
        let dead = Column::tombstone(b"c".to_vec(), right.clock().clone(), 50);
        let merged = Reconciler::Concatenating.reconcile(&left, &dead).unwrap();
        assert_eq!(merged.value(), b"ab");
        assert!(!merged.is_deleted());
    }

    #[test]
    fn counter_live_live_totals_the_join() {
        identity::initialize_for_tests();
        let codec = IncrementCounterContext::for_local().unwrap();
        let reconciler = Reconciler::IncrementCounter(CounterDeletePolicy::default());

        let mut lc = codec.create_at(1);
        codec.update(&mut lc, &node(1), 5).unwrap();
        let mut rc = codec.create_at(2);
        codec.update(&mut rc, &node(2), 7).unwrap();

        let left = Column::live(b"c".to_vec(), 5i64.to_be_bytes().to_vec(), Clock::IncrementCounter(lc));
        let right = Column::live(b"c".to_vec(), 7i64.to_be_bytes().to_vec(), Clock::IncrementCounter(rc));
        let merged = reconciler.reconcile(&left, &right).unwrap();
        assert_eq!(merged.value(), 12i64.to_be_bytes());
    }

    #[test]
    fn counter_tombstone_wins_header_ties() {
        identity::initialize_for_tests();
        let codec = IncrementCounterContext::for_local().unwrap();
        let reconciler = Reconciler::IncrementCounter(CounterDeletePolicy::default());

        let mut live_ctx = codec.create_at(10);
        codec.update(&mut live_ctx, &node(1), 5).unwrap();
        let live_header = codec.timestamp(&live_ctx).unwrap();
        let dead_ctx = codec.create_at(live_header);

        let live = Column::live(
            b"c".to_vec(),
            5i64.to_be_bytes().to_vec(),
            Clock::IncrementCounter(live_ctx.clone()),
        );
        let dead = Column::tombstone(b"c".to_vec(), Clock::IncrementCounter(dead_ctx), 77);
        let merged = reconciler.reconcile(&live, &dead).unwrap();
        assert!(merged.is_deleted());

        // A strictly newer live side survives instead.
        let newer_ctx = {
            let mut ctx = codec.create_at(live_header + 10);
            codec.update(&mut ctx, &node(1), 5).unwrap();
            ctx
        };
        let newer = Column::live(
            b"c".to_vec(),
            5i64.to_be_bytes().to_vec(),
            Clock::IncrementCounter(newer_ctx),
        );
        let stale_dead = Column::tombstone(
            b"c".to_vec(),
            Clock::IncrementCounter(codec.create_at(live_header)),
            77,
        );
        let merged = reconciler.reconcile(&newer, &stale_dead).unwrap();
        assert!(!merged.is_deleted());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let column = ColumnEntry::Column(Column::live(
            b"c".to_vec(),
            b"v".to_vec(),
            Clock::Timestamp(1),
        ));
        let sc = ColumnEntry::Super(SuperColumn::new(
            b"c".to_vec(),
            crate::types::ClockKind::Timestamp,
        ));
        assert!(matches!(
            Reconciler::LastWrite.reconcile_entries(
                &column,
                &sc,
                &crate::comparator::BytesComparator
            ),
            Err(StoreError::EntryShapeMismatch { .. })
        ));
    }

    #[test]
    fn merge_super_reconciles_subcolumns() {
        let mut left = SuperColumn::new(b"s".to_vec(), crate::types::ClockKind::Timestamp);
        left.push_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)));
        left.push_column(Column::live(b"b".to_vec(), b"2".to_vec(), Clock::Timestamp(2)));

        let mut right = SuperColumn::new(b"s".to_vec(), crate::types::ClockKind::Timestamp);
        right.push_column(Column::live(b"b".to_vec(), b"9".to_vec(), Clock::Timestamp(9)));
        right.push_column(Column::live(b"c".to_vec(), b"3".to_vec(), Clock::Timestamp(3)));

        let merged = Reconciler::LastWrite
            .merge_super(&left, &right, &crate::comparator::BytesComparator)
            .unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged
                .column(b"b", &crate::comparator::BytesComparator)
                .unwrap()
                .value(),
            b"9"
        );
    }
}
