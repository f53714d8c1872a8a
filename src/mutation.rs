//!
//! Row mutations and the write pipeline.
//!
//! A mutation is created by a client, stamped with the coordinator's
//! identity (counter families only), serialized to the commit log, and
//! reconciled into the in-memory store. The commit log and everything below
//! it are external collaborators behind the `CommitLog` seam.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;

use crate::clock::context::IncrementCounterContext;
use crate::clock::Clock;
use crate::column::{Column, ColumnEntry, SuperColumn};
use crate::config::Schema;
use crate::error::StoreError;
use crate::family::ColumnFamily;
use crate::identity;
use crate::types::NodeId;

/// A client write: per-family column changes against one row key.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMutation {
    keyspace: String,
    key: Vec<u8>,
    modifications: BTreeMap<String, ColumnFamily>,
}

impl RowMutation {
    pub fn new(keyspace: impl Into<String>, key: Vec<u8>) -> Self {
        RowMutation {
            keyspace: keyspace.into(),
            key,
            modifications: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    pub fn add(&mut self, family: ColumnFamily) -> Result<(), StoreError> {
        if self.modifications.contains_key(family.name()) {
            return Err(StoreError::Config(format!(
                "mutation already modifies family {}",
                family.name()
            )));
        }
        self.modifications.insert(family.name().to_string(), family);
        Ok(())
    }

    pub fn family(&self, name: &str) -> Option<&ColumnFamily> {
        self.modifications.get(name)
    }

    pub fn families(&self) -> impl Iterator<Item = &ColumnFamily> {
        self.modifications.values()
    }

    /// Stamps every increment-counter column with the coordinator's identity
    /// before fan-out: the column's value, read as an i64 delta, lands on
    /// `local`'s tuple in the clock context. The mutation is exclusively
    /// owned here, so the context buffers mutate before publication.
    pub fn stamped_with_local(self, local: &NodeId) -> Result<RowMutation, StoreError> {
        let codec = IncrementCounterContext::new(local.len());
        let mut modifications = BTreeMap::new();
        for (name, family) in self.modifications {
            if !family.family_type().is_counter() {
                modifications.insert(name, family);
                continue;
            }
            let stamped = family.shell();
            stamped.delete(&family.marked_for_delete_at(), family.local_deletion_time())?;
            for entry in family.entries() {
                stamped.add_column(stamp_entry(&entry, &codec, local)?)?;
            }
            modifications.insert(name, stamped);
        }
        Ok(RowMutation {
            keyspace: self.keyspace,
            key: self.key,
            modifications,
        })
    }

    /// `u16 keyspace-length · keyspace · u16 key-length · key · u32 count ·
    /// families`
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        write_short(w, self.keyspace.as_bytes(), "keyspace")?;
        write_short(w, &self.key, "row key")?;
        w.write_u32::<BigEndian>(self.modifications.len() as u32)?;
        for family in self.modifications.values() {
            family.serialize(w)?;
        }
        Ok(())
    }

    pub fn serialized(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        self.serialize(&mut out)?;
        Ok(out)
    }

    pub fn deserialize<R: Read>(r: &mut R, schema: &Schema) -> Result<RowMutation, StoreError> {
        let keyspace = String::from_utf8(read_short(r, "keyspace")?)
            .map_err(|_| StoreError::CorruptFrame("keyspace is not utf-8".to_string()))?;
        let key = read_short(r, "row key")?;
        let count = r.read_u32::<BigEndian>()? as usize;
        let mut mutation = RowMutation::new(keyspace, key);
        for _ in 0..count {
            mutation.add(ColumnFamily::deserialize(r, schema)?)?;
        }
        Ok(mutation)
    }
}

fn stamp_entry(
    entry: &ColumnEntry,
    codec: &IncrementCounterContext,
    local: &NodeId,
) -> Result<ColumnEntry, StoreError> {
    match entry {
        ColumnEntry::Column(column) => Ok(ColumnEntry::Column(stamp_column(column, codec, local)?)),
        ColumnEntry::Super(sc) => {
            let mut stamped = SuperColumn::from_parts(
                sc.name().to_vec(),
                sc.marked_for_delete_at().clone(),
                sc.local_deletion_time(),
                Vec::new(),
            );
            for column in sc.columns() {
                stamped.push_column(stamp_column(column, codec, local)?);
            }
            Ok(ColumnEntry::Super(stamped))
        }
    }
}

fn stamp_column(
    column: &Column,
    codec: &IncrementCounterContext,
    local: &NodeId,
) -> Result<Column, StoreError> {
    if column.is_deleted() {
        return Ok(column.clone());
    }
    let delta_bytes: [u8; 8] = column.value().try_into().map_err(|_| {
        StoreError::CorruptFrame(format!(
            "counter delta must be 8 bytes, got {}",
            column.value().len()
        ))
    })?;
    let delta = i64::from_be_bytes(delta_bytes);
    match column.clock() {
        Clock::IncrementCounter(ctx) => {
            let mut ctx = ctx.clone();
            codec.update(&mut ctx, local, delta)?;
            Ok(column.with_clock(Clock::IncrementCounter(ctx)))
        }
        other => Err(StoreError::ClockKindMismatch {
            left: crate::types::ClockKind::IncrementCounter,
            right: other.kind(),
        }),
    }
}

fn write_short<W: Write>(w: &mut W, bytes: &[u8], what: &str) -> Result<(), StoreError> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| StoreError::CorruptFrame(format!("{what} of {} bytes", bytes.len())))?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_short<R: Read>(r: &mut R, what: &str) -> Result<Vec<u8>, StoreError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::CorruptFrame(format!("{what} truncated before {len} bytes"))
        } else {
            err.into()
        }
    })?;
    Ok(bytes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Write pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// The storage engine's durability seam. The core serializes a mutation and
/// hands the bytes over; replay and flushing live outside.
pub trait CommitLog: Send + Sync {
    fn append(&self, mutation: &[u8]) -> Result<(), StoreError>;
}

/// Discards everything; for tests and log-free embedding.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommitLog;

impl CommitLog for NoopCommitLog {
    fn append(&self, _mutation: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }
}

type RowLocator = (String, String, Vec<u8>);

/// The in-memory store: one shared column family per `(keyspace, family,
/// row key)`, mutated only through reconciling inserts.
pub struct Store<L: CommitLog> {
    schema: Schema,
    log: L,
    rows: RwLock<HashMap<RowLocator, Arc<ColumnFamily>>>,
}

impl<L: CommitLog> Store<L> {
    pub fn new(schema: Schema, log: L) -> Self {
        Store {
            schema,
            log,
            rows: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Applies a mutation: stamp counters with the local identity, append to
    /// the commit log, then reconcile into the shared per-row families.
    pub fn apply(&self, mutation: RowMutation) -> Result<(), StoreError> {
        let mutation = mutation.stamped_with_local(identity::local()?)?;
        self.log.append(&mutation.serialized()?)?;

        for family in mutation.families() {
            let shared = self.row_family(
                mutation.keyspace(),
                family.name(),
                mutation.key().to_vec(),
            )?;
            shared.add_all(family)?;
        }
        tracing::debug!(
            keyspace = %mutation.keyspace(),
            families = mutation.families().count(),
            "applied row mutation"
        );
        Ok(())
    }

    /// The shared family for a row, or `None` when nothing was written yet.
    pub fn family(&self, keyspace: &str, family: &str, key: &[u8]) -> Option<Arc<ColumnFamily>> {
        self.rows
            .read()
            .get(&(keyspace.to_string(), family.to_string(), key.to_vec()))
            .cloned()
    }

    fn row_family(
        &self,
        keyspace: &str,
        family: &str,
        key: Vec<u8>,
    ) -> Result<Arc<ColumnFamily>, StoreError> {
        let locator = (keyspace.to_string(), family.to_string(), key);
        if let Some(existing) = self.rows.read().get(&locator) {
            return Ok(existing.clone());
        }
        let fresh = Arc::new(self.schema.new_family(family)?);
        let mut rows = self.rows.write();
        Ok(rows.entry(locator).or_insert(fresh).clone())
    }
}
