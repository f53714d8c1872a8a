//!
//! Compaction-side sanitization.
//!
//! During anti-entropy compaction against a target endpoint, counter
//! families must not ship the target's own per-node counts back to it: every
//! context is stripped of the target's tuple before write-out, and columns
//! whose context loses its last tuple are dropped. The compaction scheduler
//! and the SSTable writer are external; disk failures they raise pass
//! through untransformed.

use crate::error::StoreError;
use crate::family::ColumnFamily;
use crate::types::NodeId;

/// One row headed for an output SSTable.
#[derive(Debug, Clone)]
pub struct CompactionRow {
    pub key: Vec<u8>,
    pub family: ColumnFamily,
}

/// Strips a target replica's counts out of counter families during
/// anti-entropy compaction.
#[derive(Debug, Clone)]
pub struct AntiEntropySanitizer {
    target: NodeId,
}

impl AntiEntropySanitizer {
    pub fn new(target: NodeId) -> Self {
        AntiEntropySanitizer { target }
    }

    #[inline]
    pub fn target(&self) -> &NodeId {
        &self.target
    }

    /// The family as it should be written for the target, or `None` when
    /// nothing remains. Non-counter families pass through untouched.
    pub fn sanitize_family(
        &self,
        family: &ColumnFamily,
    ) -> Result<Option<ColumnFamily>, StoreError> {
        if !family.family_type().is_counter_clocked() {
            return Ok(Some(family.clone()));
        }
        let cleaned = family.clean_context(&self.target)?;
        if cleaned.has_content() {
            Ok(Some(cleaned))
        } else {
            tracing::debug!(
                family = %family.name(),
                target = ?self.target.as_bytes(),
                "row emptied by anti-entropy sanitization"
            );
            Ok(None)
        }
    }

    /// Streams sanitized rows into the writer, dropping emptied rows. Writer
    /// failures (disk exhaustion included) propagate untouched.
    pub fn write_sanitized<I, W>(&self, rows: I, mut writer: W) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = CompactionRow>,
        W: FnMut(CompactionRow) -> Result<(), StoreError>,
    {
        let mut written = 0;
        for row in rows {
            if let Some(family) = self.sanitize_family(&row.family)? {
                writer(CompactionRow {
                    key: row.key,
                    family,
                })?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::context::IncrementCounterContext;
    use crate::clock::Clock;
    use crate::column::Column;
    use crate::comparator::BytesComparator;
    use crate::family::ColumnFamilyType;
    use std::sync::Arc;

    fn node(n: u32) -> NodeId {
        NodeId::new(n.to_be_bytes().to_vec()).unwrap()
    }

    fn counter_family(columns: &[(&[u8], &[(u32, i64)])]) -> ColumnFamily {
        let codec = IncrementCounterContext::new(4);
        let family = ColumnFamily::new(
            "Counter1",
            ColumnFamilyType::INCREMENT_COUNTER,
            Arc::new(BytesComparator),
        );
        for (name, tuples) in columns {
            let mut ctx = codec.create_at(1);
            for (id, delta) in *tuples {
                codec.update(&mut ctx, &node(*id), *delta).unwrap();
            }
            family
                .add_column(Column::live(
                    name.to_vec(),
                    codec.total(&ctx).unwrap().to_be_bytes().to_vec(),
                    Clock::IncrementCounter(ctx),
                ))
                .unwrap();
        }
        family
    }

    #[test]
    fn strips_the_target_and_drops_emptied_columns() {
        crate::identity::initialize_for_tests();
        let codec = IncrementCounterContext::new(4);
        let family = counter_family(&[
            (b"shared", &[(1, 5), (2, 3)]),
            (b"target_only", &[(2, 9)]),
        ]);

        let sanitizer = AntiEntropySanitizer::new(node(2));
        let cleaned = sanitizer.sanitize_family(&family).unwrap().unwrap();
        assert_eq!(cleaned.len(), 1);
        match cleaned.column(b"shared").unwrap().as_ref() {
            crate::column::ColumnEntry::Column(c) => {
                let ctx = c.clock().context().unwrap();
                assert_eq!(codec.tuple_count(ctx).unwrap(), 1);
            }
            _ => panic!("expected a plain column"),
        }
    }

    #[test]
    fn rows_left_empty_are_dropped() {
        crate::identity::initialize_for_tests();
        let only_target = counter_family(&[(b"c", &[(2, 9)])]);
        let sanitizer = AntiEntropySanitizer::new(node(2));
        assert!(sanitizer.sanitize_family(&only_target).unwrap().is_none());

        let mut written = Vec::new();
        let count = sanitizer
            .write_sanitized(
                vec![
                    CompactionRow {
                        key: b"row1".to_vec(),
                        family: counter_family(&[(b"c", &[(1, 5), (2, 3)])]),
                    },
                    CompactionRow {
                        key: b"row2".to_vec(),
                        family: counter_family(&[(b"c", &[(2, 9)])]),
                    },
                ],
                |row| {
                    written.push(row.key.clone());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(written, vec![b"row1".to_vec()]);
    }

    #[test]
    fn non_counter_families_pass_through() {
        let family = ColumnFamily::new(
            "Standard1",
            ColumnFamilyType::STANDARD,
            Arc::new(BytesComparator) as Arc<dyn crate::comparator::NameComparator>,
        );
        family
            .add_column(Column::live(b"c".to_vec(), b"v".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        let sanitizer = AntiEntropySanitizer::new(node(9));
        let out = sanitizer.sanitize_family(&family).unwrap().unwrap();
        assert_eq!(out, family);
    }

    #[test]
    fn writer_failures_propagate() {
        crate::identity::initialize_for_tests();
        let sanitizer = AntiEntropySanitizer::new(node(9));
        let result = sanitizer.write_sanitized(
            vec![CompactionRow {
                key: b"row1".to_vec(),
                family: counter_family(&[(b"c", &[(1, 5)])]),
            }],
            |_| Err(StoreError::DiskFull("device out of space".to_string())),
        );
        assert!(matches!(result, Err(StoreError::DiskFull(_))));
    }
}
