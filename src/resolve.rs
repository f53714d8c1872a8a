//!
//! Read-side resolution: merge N replica responses into a superset row,
//! compute per-replica diffs, and schedule targeted repairs back to stale
//! replicas.
//!
//! Remote counter snapshots are never trusted about this node: their
//! local-node tuples are stripped before resolution, and each repair is
//! stripped of its recipient's own tuple before it is scheduled.

use crate::error::StoreError;
use crate::family::ColumnFamily;
use crate::identity;
use crate::mutation::RowMutation;
use crate::types::NodeId;

/// One replica's answer to a read: a full snapshot or an MD5 digest of one.
#[derive(Debug, Clone)]
pub enum ReadResponse {
    Data {
        from: NodeId,
        family: ColumnFamily,
    },
    Digest {
        from: NodeId,
        digest: [u8; 16],
    },
}

/// The messaging layer's seam for one-way repair mutations.
pub trait RepairSink: Send + Sync {
    fn schedule_repair(&self, endpoint: &NodeId, mutation: RowMutation) -> Result<(), StoreError>;
}

/// Swallows repairs; for digest-only verification paths and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRepairSink;

impl RepairSink for NoopRepairSink {
    fn schedule_repair(&self, _endpoint: &NodeId, _mutation: RowMutation) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Resolves the fan-out for one `(keyspace, row key)` read.
pub struct ReadResolver<'s, S: RepairSink> {
    keyspace: String,
    key: Vec<u8>,
    sink: &'s S,
}

impl<'s, S: RepairSink> ReadResolver<'s, S> {
    pub fn new(keyspace: impl Into<String>, key: Vec<u8>, sink: &'s S) -> Self {
        ReadResolver {
            keyspace: keyspace.into(),
            key,
            sink,
        }
    }

    /// Merges the responses into the superset family, scheduling a repair to
    /// every replica whose version is missing information.
    ///
    /// Digest responses are cross-checked against every full snapshot first;
    /// any disagreement surfaces as `DigestMismatch` so the coordinator can
    /// retry with full data.
    pub fn resolve(&self, responses: Vec<ReadResponse>) -> Result<ColumnFamily, StoreError> {
        let local = identity::local()?;

        let mut versions: Vec<(NodeId, ColumnFamily)> = Vec::new();
        let mut digests: Vec<[u8; 16]> = Vec::new();
        for response in responses {
            match response {
                ReadResponse::Data { from, family } => versions.push((from, family)),
                ReadResponse::Digest { digest, .. } => digests.push(digest),
            }
        }

        if let Some(expected) = digests.first().copied() {
            if digests.iter().any(|digest| *digest != expected) {
                tracing::warn!(key = ?self.key, "digest responses disagree");
                return Err(StoreError::DigestMismatch);
            }
            for (from, family) in &versions {
                if family.digest()? != expected {
                    tracing::warn!(
                        key = ?self.key,
                        from = ?from.as_bytes(),
                        "data response disagrees with digests"
                    );
                    return Err(StoreError::DigestMismatch);
                }
            }
        }

        if versions.is_empty() {
            return Err(StoreError::NoDataResponse);
        }

        // A remote's view of our own counts is never trusted.
        let counter = versions[0].1.family_type().is_counter_clocked();
        if counter {
            for (from, family) in versions.iter_mut() {
                if from != local {
                    *family = family.clean_context(local)?;
                }
            }
        }

        let superset = versions[0].1.shell();
        for (_, version) in &versions {
            superset.add_all(version)?;
        }

        for (from, version) in &versions {
            let Some(diff) = version.diff(&superset)? else {
                continue;
            };
            let diff = if counter {
                // A replica needs no repair for counts only it contributed.
                diff.clean_context(from)?
            } else {
                diff
            };
            if !diff.has_content() {
                continue;
            }
            tracing::debug!(
                key = ?self.key,
                endpoint = ?from.as_bytes(),
                columns = diff.len(),
                "scheduling read repair"
            );
            let mut mutation = RowMutation::new(self.keyspace.clone(), self.key.clone());
            mutation.add(diff)?;
            self.sink.schedule_repair(from, mutation)?;
        }

        Ok(superset)
    }
}
