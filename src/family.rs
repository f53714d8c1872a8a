//!
//! Column families: the concurrent, comparator-ordered mapping from column
//! name to column (or super column), with family-level tombstone metadata.
//!
//! The write loop in `add_column` is the only correct mutation protocol for
//! the map. Callers must not mutate columns after insertion; reconciliation
//! replaces them wholesale.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::{Mutex, RwLock};

use crate::clock::context::{IncrementCounterContext, StandardCounterContext};
use crate::clock::{Clock, PartialOrder};
use crate::column::{display_name, Column, ColumnEntry, SuperColumn};
use crate::comparator::NameComparator;
use crate::config::Schema;
use crate::error::StoreError;
use crate::reconcile::Reconciler;
use crate::types::{ClockKind, NodeId};

// ─────────────────────────────────────────────────────────────────────────────
// Family types
// ─────────────────────────────────────────────────────────────────────────────

/// Column-family type flags (bits 0-2 defined).
///
/// Bit 0 marks super families, bit 1 the retired version-vector families
/// (kept for wire compatibility), bit 2 increment counters. The type selects
/// the clock kind, the default minimum clock, and the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnFamilyType(u8);

impl ColumnFamilyType {
    const SUPER_BIT: u8 = 1 << 0;
    const VERSION_BIT: u8 = 1 << 1;
    const COUNTER_BIT: u8 = 1 << 2;

    pub const STANDARD: ColumnFamilyType = ColumnFamilyType(0);
    pub const SUPER: ColumnFamilyType = ColumnFamilyType(Self::SUPER_BIT);
    pub const VERSION: ColumnFamilyType = ColumnFamilyType(Self::VERSION_BIT);
    pub const SUPER_VERSION: ColumnFamilyType =
        ColumnFamilyType(Self::SUPER_BIT | Self::VERSION_BIT);
    pub const INCREMENT_COUNTER: ColumnFamilyType = ColumnFamilyType(Self::COUNTER_BIT);
    pub const SUPER_INCREMENT_COUNTER: ColumnFamilyType =
        ColumnFamilyType(Self::SUPER_BIT | Self::COUNTER_BIT);

    /// Decodes a wire tag. Version and counter bits are mutually exclusive.
    pub fn from_tag(tag: u8) -> Result<ColumnFamilyType, StoreError> {
        let known = Self::SUPER_BIT | Self::VERSION_BIT | Self::COUNTER_BIT;
        if tag & !known != 0 || (tag & Self::VERSION_BIT != 0 && tag & Self::COUNTER_BIT != 0) {
            return Err(StoreError::CorruptFrame(format!(
                "invalid column family type tag: {tag:#04b}"
            )));
        }
        Ok(ColumnFamilyType(tag))
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_super(self) -> bool {
        self.0 & Self::SUPER_BIT != 0
    }

    #[inline]
    pub fn is_version(self) -> bool {
        self.0 & Self::VERSION_BIT != 0
    }

    #[inline]
    pub fn is_counter(self) -> bool {
        self.0 & Self::COUNTER_BIT != 0
    }

    /// Whether columns of this family carry counter contexts of either
    /// flavor. Such families reconcile unconditionally on collision.
    #[inline]
    pub fn is_counter_clocked(self) -> bool {
        self.is_counter() || self.is_version()
    }

    pub fn clock_kind(self) -> ClockKind {
        if self.is_counter() {
            ClockKind::IncrementCounter
        } else if self.is_version() {
            ClockKind::StandardCounter
        } else {
            ClockKind::Timestamp
        }
    }

    /// The default minimum clock used to initialize tombstones.
    pub fn min_clock(self) -> Clock {
        Clock::minimum(self.clock_kind())
    }

    pub fn reconciler(self) -> Reconciler {
        if self.is_counter() {
            Reconciler::IncrementCounter(Default::default())
        } else if self.is_version() {
            Reconciler::Concatenating
        } else {
            Reconciler::LastWrite
        }
    }

    pub fn parse(name: &str) -> Result<ColumnFamilyType, StoreError> {
        match name {
            "Standard" => Ok(Self::STANDARD),
            "Super" => Ok(Self::SUPER),
            "Version" => Ok(Self::VERSION),
            "SuperVersion" => Ok(Self::SUPER_VERSION),
            "IncrementCounter" => Ok(Self::INCREMENT_COUNTER),
            "SuperIncrementCounter" => Ok(Self::SUPER_INCREMENT_COUNTER),
            other => Err(StoreError::Config(format!(
                "unknown column family type: {other:?}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match (self.is_super(), self.is_version(), self.is_counter()) {
            (false, false, false) => "Standard",
            (true, false, false) => "Super",
            (false, true, false) => "Version",
            (true, true, false) => "SuperVersion",
            (false, false, true) => "IncrementCounter",
            (true, false, true) => "SuperIncrementCounter",
            _ => "Invalid",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrent sorted map
// ─────────────────────────────────────────────────────────────────────────────

/// A comparator-ordered map of column entries supporting `put_if_absent` and
/// pointer-identity `replace`, each linearizable under the inner lock.
///
/// The write loop re-reads after every failed replace; iterator stability
/// across operations is deliberately not offered (snapshots copy).
#[derive(Debug)]
pub struct ColumnMap {
    comparator: Arc<dyn NameComparator>,
    slots: RwLock<Vec<Arc<ColumnEntry>>>,
}

impl ColumnMap {
    pub fn new(comparator: Arc<dyn NameComparator>) -> Self {
        ColumnMap {
            comparator,
            slots: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn comparator(&self) -> &Arc<dyn NameComparator> {
        &self.comparator
    }

    fn position(&self, slots: &[Arc<ColumnEntry>], name: &[u8]) -> Result<usize, usize> {
        slots.binary_search_by(|entry| self.comparator.compare(entry.name(), name))
    }

    pub fn get(&self, name: &[u8]) -> Option<Arc<ColumnEntry>> {
        let slots = self.slots.read();
        self.position(&slots, name).ok().map(|at| slots[at].clone())
    }

    /// Inserts the entry unless its name is taken; the incumbent comes back
    /// on collision.
    pub fn put_if_absent(&self, entry: Arc<ColumnEntry>) -> Result<(), Arc<ColumnEntry>> {
        let mut slots = self.slots.write();
        match self.position(&slots, entry.name()) {
            Ok(at) => Err(slots[at].clone()),
            Err(at) => {
                slots.insert(at, entry);
                Ok(())
            }
        }
    }

    /// Swaps `expected` for `new` only while `expected` is still the stored
    /// entry (pointer identity). Returns false when a racing writer got
    /// there first; the caller re-reads and retries.
    pub fn replace(&self, expected: &Arc<ColumnEntry>, new: Arc<ColumnEntry>) -> bool {
        let mut slots = self.slots.write();
        match self.position(&slots, new.name()) {
            Ok(at) if Arc::ptr_eq(&slots[at], expected) => {
                slots[at] = new;
                true
            }
            _ => false,
        }
    }

    /// The entries in comparator order, as of one consistent instant.
    pub fn snapshot(&self) -> Vec<Arc<ColumnEntry>> {
        self.slots.read().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl Clone for ColumnMap {
    fn clone(&self) -> Self {
        ColumnMap {
            comparator: self.comparator.clone(),
            slots: RwLock::new(self.slots.read().clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column family
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FamilyTombstone {
    marked_for_delete_at: Clock,
    local_deletion_time: i32,
}

/// A named, comparator-ordered collection of columns with family-level
/// tombstone metadata.
#[derive(Debug)]
pub struct ColumnFamily {
    name: String,
    family_type: ColumnFamilyType,
    map: ColumnMap,
    tombstone: Mutex<FamilyTombstone>,
}

impl ColumnFamily {
    pub fn new(
        name: impl Into<String>,
        family_type: ColumnFamilyType,
        comparator: Arc<dyn NameComparator>,
    ) -> Self {
        ColumnFamily {
            name: name.into(),
            family_type,
            map: ColumnMap::new(comparator),
            tombstone: Mutex::new(FamilyTombstone {
                marked_for_delete_at: family_type.min_clock(),
                local_deletion_time: i32::MIN,
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn family_type(&self) -> ColumnFamilyType {
        self.family_type
    }

    #[inline]
    pub fn clock_kind(&self) -> ClockKind {
        self.family_type.clock_kind()
    }

    #[inline]
    pub fn comparator(&self) -> &Arc<dyn NameComparator> {
        self.map.comparator()
    }

    /// An empty family with the same metadata.
    pub fn shell(&self) -> ColumnFamily {
        ColumnFamily::new(
            self.name.clone(),
            self.family_type,
            self.map.comparator().clone(),
        )
    }

    pub fn column(&self, name: &[u8]) -> Option<Arc<ColumnEntry>> {
        self.map.get(name)
    }

    /// The entries in comparator order, as of one consistent instant.
    pub fn entries(&self) -> Vec<Arc<ColumnEntry>> {
        self.map.snapshot()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether this family still says anything: live entries or a tombstone.
    pub fn has_content(&self) -> bool {
        !self.is_empty() || self.is_marked_for_delete()
    }

    pub fn marked_for_delete_at(&self) -> Clock {
        self.tombstone.lock().marked_for_delete_at.clone()
    }

    pub fn local_deletion_time(&self) -> i32 {
        self.tombstone.lock().local_deletion_time
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete_at() != self.family_type.min_clock()
    }

    /// Raises the family tombstone pair under atomic-max semantics; disjoint
    /// clocks join through `superset` before the swap.
    pub fn delete(&self, clock: &Clock, local_deletion_time: i32) -> Result<(), StoreError> {
        let mut tombstone = self.tombstone.lock();
        tombstone.local_deletion_time = tombstone.local_deletion_time.max(local_deletion_time);
        match tombstone.marked_for_delete_at.compare(clock)? {
            PartialOrder::LessThan => tombstone.marked_for_delete_at = clock.clone(),
            PartialOrder::Disjoint => {
                tombstone.marked_for_delete_at =
                    Clock::superset(&[&tombstone.marked_for_delete_at, clock])?;
            }
            PartialOrder::GreaterThan | PartialOrder::Equal => {}
        }
        Ok(())
    }

    /// Inserts a column, reconciling against concurrent writers until the
    /// map holds a causally correct result.
    ///
    /// Counter-clocked families (and super entries) reconcile
    /// unconditionally. Timestamped families keep a strictly newer
    /// incumbent and reconcile everything else, so equal-clock ties resolve
    /// through the reconciler's tie-breaks; every failed swap re-reads and
    /// retries.
    pub fn add_column(&self, entry: impl Into<ColumnEntry>) -> Result<(), StoreError> {
        let reconciler = self.family_type.reconciler();
        let comparator = self.map.comparator().clone();
        let new: Arc<ColumnEntry> = Arc::new(entry.into());

        loop {
            let incumbent = match self.map.put_if_absent(new.clone()) {
                Ok(()) => return Ok(()),
                Err(incumbent) => incumbent,
            };

            if self.family_type.is_counter_clocked() || new.is_super() {
                let merged =
                    Arc::new(reconciler.reconcile_entries(&incumbent, &new, comparator.as_ref())?);
                if self.map.replace(&incumbent, merged) {
                    return Ok(());
                }
                continue;
            }

            match entry_priority(&incumbent, &new)? {
                PartialOrder::GreaterThan => return Ok(()),
                PartialOrder::LessThan | PartialOrder::Equal | PartialOrder::Disjoint => {
                    let merged = Arc::new(reconciler.reconcile_entries(
                        &incumbent,
                        &new,
                        comparator.as_ref(),
                    )?);
                    if self.map.replace(&incumbent, merged) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Merges a whole family into this one: tombstone max plus per-column
    /// reconciliation.
    pub fn add_all(&self, other: &ColumnFamily) -> Result<(), StoreError> {
        if self.name != other.name || self.family_type != other.family_type {
            return Err(StoreError::Config(format!(
                "cannot merge family {} ({}) into {} ({})",
                other.name,
                other.family_type.as_str(),
                self.name,
                self.family_type.as_str()
            )));
        }
        self.delete(&other.marked_for_delete_at(), other.local_deletion_time())?;
        for entry in other.entries() {
            self.add_column((*entry).clone())?;
        }
        Ok(())
    }

    /// MD5 over the serialized entries and the tombstone pair; replicas
    /// answering a digest read return exactly this.
    pub fn digest(&self) -> Result<[u8; 16], StoreError> {
        let mut digest = md5::Context::new();
        for entry in self.entries() {
            entry.update_digest(&mut digest)?;
        }
        digest.consume(self.marked_for_delete_at().serialized()?);
        digest.consume(self.local_deletion_time().to_be_bytes());
        Ok(digest.compute().0)
    }

    /// What this family is missing relative to `superset`: the entries (and
    /// tombstone) whose information this replica lacks. `None` when nothing
    /// is missing.
    pub fn diff(&self, superset: &ColumnFamily) -> Result<Option<ColumnFamily>, StoreError> {
        let out = superset.shell();
        let mut tombstone_newer = false;

        let sup_clock = superset.marked_for_delete_at();
        match self.marked_for_delete_at().compare(&sup_clock)? {
            PartialOrder::LessThan | PartialOrder::Disjoint => {
                out.delete(&sup_clock, superset.local_deletion_time())?;
                tombstone_newer = true;
            }
            PartialOrder::GreaterThan | PartialOrder::Equal => {}
        }

        for entry in superset.entries() {
            match self.column(entry.name()) {
                None => out.add_column((*entry).clone())?,
                Some(mine) => match (mine.as_ref(), entry.as_ref()) {
                    (ColumnEntry::Column(m), ColumnEntry::Column(s)) => {
                        if column_missing(m, s)? {
                            out.add_column((*entry).clone())?;
                        }
                    }
                    (ColumnEntry::Super(m), ColumnEntry::Super(s)) => {
                        if let Some(sub) = super_diff(m, s, self.comparator().as_ref())? {
                            out.add_column(ColumnEntry::Super(sub))?;
                        }
                    }
                    _ => {
                        return Err(StoreError::EntryShapeMismatch {
                            column: display_name(entry.name()),
                        })
                    }
                },
            }
        }

        if out.is_empty() && !tombstone_newer {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    /// A copy with `node`'s per-node counts stripped from every counter
    /// context; columns whose context loses its last tuple are dropped.
    pub fn clean_context(&self, node: &NodeId) -> Result<ColumnFamily, StoreError> {
        let out = self.shell();
        out.delete(&self.marked_for_delete_at(), self.local_deletion_time())?;
        let mut dropped = 0usize;
        for entry in self.entries() {
            match clean_entry(&entry, node)? {
                Some(cleaned) => out.add_column(cleaned)?,
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::debug!(
                family = %self.name,
                node = ?node.as_bytes(),
                dropped,
                "dropped columns emptied by context cleaning"
            );
        }
        Ok(out)
    }

    /// Exact byte count produced by `serialize`.
    pub fn size(&self) -> usize {
        2 + self.name.len()
            + 1
            + self.marked_for_delete_at().size()
            + 4
            + 4
            + self
                .entries()
                .iter()
                .map(|entry| entry.size())
                .sum::<usize>()
    }

    /// `u16 name-length · name · u8 type tag · tombstone clock · i32
    /// deletion-time · u32 count · entries`
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        let name = self.name.as_bytes();
        let len = u16::try_from(name.len())
            .map_err(|_| StoreError::CorruptFrame(format!("family name of {} bytes", name.len())))?;
        w.write_u16::<BigEndian>(len)?;
        w.write_all(name)?;
        w.write_u8(self.family_type.tag())?;
        self.marked_for_delete_at().serialize(w)?;
        w.write_i32::<BigEndian>(self.local_deletion_time())?;
        let entries = self.entries();
        w.write_u32::<BigEndian>(entries.len() as u32)?;
        for entry in entries {
            entry.serialize(w)?;
        }
        Ok(())
    }

    /// Family metadata on the wire names the comparator only through the
    /// schema; unknown families are rejected.
    pub fn deserialize<R: Read>(r: &mut R, schema: &Schema) -> Result<ColumnFamily, StoreError> {
        let len = r.read_u16::<BigEndian>()? as usize;
        let mut name = vec![0u8; len];
        r.read_exact(&mut name).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::CorruptFrame(format!("family name truncated before {len} bytes"))
            } else {
                err.into()
            }
        })?;
        let name = String::from_utf8(name)
            .map_err(|_| StoreError::CorruptFrame("family name is not utf-8".to_string()))?;
        let family_type = ColumnFamilyType::from_tag(r.read_u8()?)?;

        let meta = schema
            .family(&name)
            .ok_or_else(|| StoreError::UnknownFamily(name.clone()))?;
        if meta.family_type != family_type {
            return Err(StoreError::CorruptFrame(format!(
                "family {name} arrived as {} but the schema says {}",
                family_type.as_str(),
                meta.family_type.as_str()
            )));
        }

        let kind = family_type.clock_kind();
        let marked_for_delete_at = Clock::deserialize(kind, r)?;
        let local_deletion_time = r.read_i32::<BigEndian>()?;
        let count = r.read_u32::<BigEndian>()? as usize;

        let family = ColumnFamily::new(name, family_type, meta.comparator.clone());
        family.delete(&marked_for_delete_at, local_deletion_time)?;
        for _ in 0..count {
            let entry = ColumnEntry::deserialize(kind, family_type.is_super(), r)?;
            family.add_column(entry)?;
        }
        Ok(family)
    }
}

impl Clone for ColumnFamily {
    fn clone(&self) -> Self {
        ColumnFamily {
            name: self.name.clone(),
            family_type: self.family_type,
            map: self.map.clone(),
            tombstone: Mutex::new(self.tombstone.lock().clone()),
        }
    }
}

impl PartialEq for ColumnFamily {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.family_type != other.family_type
            || self.marked_for_delete_at() != other.marked_for_delete_at()
            || self.local_deletion_time() != other.local_deletion_time()
        {
            return false;
        }
        let (left, right) = (self.entries(), other.entries());
        left.len() == right.len()
            && left
                .iter()
                .zip(right.iter())
                .all(|(l, r)| l.as_ref() == r.as_ref())
    }
}

impl Eq for ColumnFamily {}

/// Recency of the incumbent against the candidate, tombstones winning ties.
fn entry_priority(incumbent: &ColumnEntry, new: &ColumnEntry) -> Result<PartialOrder, StoreError> {
    match (incumbent, new) {
        (ColumnEntry::Column(old), ColumnEntry::Column(new)) => {
            match old.clock().compare(new.clock())? {
                PartialOrder::Equal => Ok(match (old.is_deleted(), new.is_deleted()) {
                    (true, false) => PartialOrder::GreaterThan,
                    (false, true) => PartialOrder::LessThan,
                    _ => PartialOrder::Equal,
                }),
                rel => Ok(rel),
            }
        }
        _ => Err(StoreError::EntryShapeMismatch {
            column: display_name(incumbent.name()),
        }),
    }
}

fn column_missing(mine: &Column, reference: &Column) -> Result<bool, StoreError> {
    Ok(match mine.clock().diff(reference.clock())? {
        PartialOrder::LessThan | PartialOrder::Disjoint => true,
        PartialOrder::Equal => mine != reference,
        PartialOrder::GreaterThan => false,
    })
}

fn super_diff(
    mine: &SuperColumn,
    reference: &SuperColumn,
    comparator: &dyn NameComparator,
) -> Result<Option<SuperColumn>, StoreError> {
    let mut out = SuperColumn::new(
        reference.name().to_vec(),
        reference.marked_for_delete_at().kind(),
    );
    let mut tombstone_newer = false;
    match mine
        .marked_for_delete_at()
        .compare(reference.marked_for_delete_at())?
    {
        PartialOrder::LessThan | PartialOrder::Disjoint => {
            out.delete(
                reference.marked_for_delete_at(),
                reference.local_deletion_time(),
            )?;
            tombstone_newer = true;
        }
        PartialOrder::GreaterThan | PartialOrder::Equal => {}
    }

    for column in reference.columns() {
        match mine.column(column.name(), comparator) {
            None => out.push_column(column.clone()),
            Some(m) => {
                if column_missing(m, column)? {
                    out.push_column(column.clone());
                }
            }
        }
    }

    if out.is_empty() && !tombstone_newer {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn cleaned_clock(clock: &Clock, node: &NodeId) -> Result<Option<Clock>, StoreError> {
    match clock {
        Clock::Timestamp(_) => Ok(Some(clock.clone())),
        Clock::IncrementCounter(ctx) => {
            let codec = IncrementCounterContext::for_local()?;
            let cleaned = codec.clean_node_counts(ctx, node)?;
            if codec.tuple_count(&cleaned)? == 0 {
                Ok(None)
            } else {
                Ok(Some(Clock::IncrementCounter(cleaned.into_owned())))
            }
        }
        Clock::StandardCounter(ctx) => {
            let codec = StandardCounterContext::for_local()?;
            let cleaned = codec.clean_node_counts(ctx, node)?;
            if codec.tuple_count(&cleaned)? == 0 {
                Ok(None)
            } else {
                Ok(Some(Clock::StandardCounter(cleaned.into_owned())))
            }
        }
    }
}

fn clean_entry(entry: &ColumnEntry, node: &NodeId) -> Result<Option<ColumnEntry>, StoreError> {
    match entry {
        ColumnEntry::Column(column) => Ok(cleaned_clock(column.clock(), node)?
            .map(|clock| ColumnEntry::Column(column.with_clock(clock)))),
        ColumnEntry::Super(sc) => {
            let mut cleaned = SuperColumn::from_parts(
                sc.name().to_vec(),
                sc.marked_for_delete_at().clone(),
                sc.local_deletion_time(),
                Vec::new(),
            );
            for column in sc.columns() {
                if let Some(clock) = cleaned_clock(column.clock(), node)? {
                    cleaned.push_column(column.with_clock(clock));
                }
            }
            if cleaned.is_empty() && !cleaned.is_marked_for_delete() {
                Ok(None)
            } else {
                Ok(Some(ColumnEntry::Super(cleaned)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytesComparator;
    use crate::config::Schema;
    use crate::identity;
    use crate::reconcile::CounterDeletePolicy;

    fn node(n: u32) -> NodeId {
        NodeId::new(n.to_be_bytes().to_vec()).unwrap()
    }

    fn standard(name: &str) -> ColumnFamily {
        ColumnFamily::new(name, ColumnFamilyType::STANDARD, Arc::new(BytesComparator))
    }

    fn counter(name: &str) -> ColumnFamily {
        ColumnFamily::new(
            name,
            ColumnFamilyType::INCREMENT_COUNTER,
            Arc::new(BytesComparator),
        )
    }

    #[test]
    fn type_flags_decompose() {
        assert!(!ColumnFamilyType::STANDARD.is_super());
        assert!(ColumnFamilyType::SUPER.is_super());
        assert!(ColumnFamilyType::VERSION.is_version());
        assert!(ColumnFamilyType::INCREMENT_COUNTER.is_counter());
        assert!(ColumnFamilyType::SUPER_INCREMENT_COUNTER.is_super());
        assert!(ColumnFamilyType::SUPER_INCREMENT_COUNTER.is_counter());

        assert_eq!(
            ColumnFamilyType::STANDARD.clock_kind(),
            ClockKind::Timestamp
        );
        assert_eq!(
            ColumnFamilyType::VERSION.clock_kind(),
            ClockKind::StandardCounter
        );
        assert_eq!(
            ColumnFamilyType::INCREMENT_COUNTER.clock_kind(),
            ClockKind::IncrementCounter
        );

        // Version and counter bits never combine.
        assert!(ColumnFamilyType::from_tag(0b110).is_err());
        assert!(ColumnFamilyType::from_tag(0b1000).is_err());
        for t in [
            ColumnFamilyType::STANDARD,
            ColumnFamilyType::SUPER,
            ColumnFamilyType::VERSION,
            ColumnFamilyType::SUPER_VERSION,
            ColumnFamilyType::INCREMENT_COUNTER,
            ColumnFamilyType::SUPER_INCREMENT_COUNTER,
        ] {
            assert_eq!(ColumnFamilyType::from_tag(t.tag()).unwrap(), t);
            assert_eq!(ColumnFamilyType::parse(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn reconciler_selection_follows_the_type() {
        assert_eq!(
            ColumnFamilyType::STANDARD.reconciler(),
            Reconciler::LastWrite
        );
        assert_eq!(
            ColumnFamilyType::VERSION.reconciler(),
            Reconciler::Concatenating
        );
        assert_eq!(
            ColumnFamilyType::INCREMENT_COUNTER.reconciler(),
            Reconciler::IncrementCounter(CounterDeletePolicy::TombstoneWinsTies)
        );
    }

    #[test]
    fn map_put_if_absent_and_replace() {
        let map = ColumnMap::new(Arc::new(BytesComparator));
        let a = Arc::new(ColumnEntry::Column(Column::live(
            b"a".to_vec(),
            b"1".to_vec(),
            Clock::Timestamp(1),
        )));
        assert!(map.put_if_absent(a.clone()).is_ok());

        let a2 = Arc::new(ColumnEntry::Column(Column::live(
            b"a".to_vec(),
            b"2".to_vec(),
            Clock::Timestamp(2),
        )));
        let incumbent = map.put_if_absent(a2.clone()).unwrap_err();
        assert!(Arc::ptr_eq(&incumbent, &a));

        assert!(map.replace(&incumbent, a2.clone()));
        // The stale pointer no longer swaps.
        assert!(!map.replace(&incumbent, a.clone()));
        assert!(Arc::ptr_eq(&map.get(b"a").unwrap(), &a2));
    }

    #[test]
    fn standard_insert_is_last_writer_wins() {
        let family = standard("Standard1");
        family
            .add_column(Column::live(b"c".to_vec(), b"old".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        family
            .add_column(Column::live(b"c".to_vec(), b"new".to_vec(), Clock::Timestamp(5)))
            .unwrap();
        // A stale write never regresses the column.
        family
            .add_column(Column::live(b"c".to_vec(), b"stale".to_vec(), Clock::Timestamp(3)))
            .unwrap();

        let entry = family.column(b"c").unwrap();
        match entry.as_ref() {
            ColumnEntry::Column(c) => assert_eq!(c.value(), b"new"),
            _ => panic!("expected a plain column"),
        }
    }

    #[test]
    fn equal_clock_live_tie_breaks_on_value_bytes() {
        // Whichever order equal-clock writes land in, the greater value
        // bytes win, so replicas converge.
        for (first, second) in [(&b"bbb"[..], &b"aaa"[..]), (&b"aaa"[..], &b"bbb"[..])] {
            let family = standard("Standard1");
            family
                .add_column(Column::live(b"c".to_vec(), first.to_vec(), Clock::Timestamp(7)))
                .unwrap();
            family
                .add_column(Column::live(b"c".to_vec(), second.to_vec(), Clock::Timestamp(7)))
                .unwrap();

            match family.column(b"c").unwrap().as_ref() {
                ColumnEntry::Column(c) => assert_eq!(c.value(), b"bbb"),
                _ => panic!("expected a plain column"),
            }
        }
    }

    #[test]
    fn equal_clock_tombstone_tie_keeps_the_later_deletion_time() {
        for (first, second) in [(100, 50), (50, 100)] {
            let family = standard("Standard1");
            family
                .add_column(Column::tombstone(b"c".to_vec(), Clock::Timestamp(7), first))
                .unwrap();
            family
                .add_column(Column::tombstone(b"c".to_vec(), Clock::Timestamp(7), second))
                .unwrap();

            match family.column(b"c").unwrap().as_ref() {
                ColumnEntry::Column(c) => {
                    assert!(c.is_deleted());
                    assert_eq!(c.local_deletion_time(), Some(100));
                }
                _ => panic!("expected a plain column"),
            }
        }
    }

    #[test]
    fn tombstone_absorbs_older_live_column() {
        let family = standard("Standard1");
        family
            .add_column(Column::live(b"c".to_vec(), b"v".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        family
            .add_column(Column::tombstone(b"c".to_vec(), Clock::Timestamp(2), 9))
            .unwrap();

        match family.column(b"c").unwrap().as_ref() {
            ColumnEntry::Column(c) => assert!(c.is_deleted()),
            _ => panic!("expected a plain column"),
        }
    }

    #[test]
    fn counter_inserts_merge_contexts() {
        identity::initialize_for_tests();
        let codec = IncrementCounterContext::for_local().unwrap();
        let family = counter("Counter1");

        let mut a = codec.create_at(1);
        codec.update(&mut a, &node(1), 5).unwrap();
        let mut b = codec.create_at(2);
        codec.update(&mut b, &node(2), 7).unwrap();

        family
            .add_column(Column::live(
                b"c".to_vec(),
                5i64.to_be_bytes().to_vec(),
                Clock::IncrementCounter(a),
            ))
            .unwrap();
        family
            .add_column(Column::live(
                b"c".to_vec(),
                7i64.to_be_bytes().to_vec(),
                Clock::IncrementCounter(b),
            ))
            .unwrap();

        match family.column(b"c").unwrap().as_ref() {
            ColumnEntry::Column(c) => {
                assert_eq!(c.value(), 12i64.to_be_bytes());
                let ctx = c.clock().context().unwrap();
                assert_eq!(codec.tuple_count(ctx).unwrap(), 2);
            }
            _ => panic!("expected a plain column"),
        }
    }

    #[test]
    fn family_tombstone_is_an_atomic_max() {
        let family = standard("Standard1");
        assert!(!family.is_marked_for_delete());

        family.delete(&Clock::Timestamp(10), 100).unwrap();
        family.delete(&Clock::Timestamp(4), 40).unwrap();
        assert_eq!(family.marked_for_delete_at(), Clock::Timestamp(10));
        assert_eq!(family.local_deletion_time(), 100);
        assert!(family.is_marked_for_delete());
    }

    #[test]
    fn add_all_merges_columns_and_tombstone() {
        let left = standard("Standard1");
        left.add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();

        let right = standard("Standard1");
        right
            .add_column(Column::live(b"a".to_vec(), b"2".to_vec(), Clock::Timestamp(2)))
            .unwrap();
        right
            .add_column(Column::live(b"b".to_vec(), b"3".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        right.delete(&Clock::Timestamp(1), 7).unwrap();

        left.add_all(&right).unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left.marked_for_delete_at(), Clock::Timestamp(1));
        match left.column(b"a").unwrap().as_ref() {
            ColumnEntry::Column(c) => assert_eq!(c.value(), b"2"),
            _ => panic!("expected a plain column"),
        }

        let other = counter("Counter1");
        assert!(left.add_all(&other).is_err());
    }

    #[test]
    fn digest_tracks_content() {
        let left = standard("Standard1");
        let right = standard("Standard1");
        assert_eq!(left.digest().unwrap(), right.digest().unwrap());

        left.add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        assert_ne!(left.digest().unwrap(), right.digest().unwrap());

        right
            .add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        assert_eq!(left.digest().unwrap(), right.digest().unwrap());
    }

    #[test]
    fn diff_returns_what_the_replica_misses() {
        let mine = standard("Standard1");
        mine.add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();

        let superset = standard("Standard1");
        superset
            .add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        superset
            .add_column(Column::live(b"b".to_vec(), b"2".to_vec(), Clock::Timestamp(2)))
            .unwrap();

        let diff = mine.diff(&superset).unwrap().unwrap();
        assert_eq!(diff.len(), 1);
        assert!(diff.column(b"b").is_some());

        // Identical families have no diff.
        assert!(superset.diff(&superset.clone()).unwrap().is_none());
    }

    #[test]
    fn clean_context_strips_a_node_and_drops_emptied_columns() {
        identity::initialize_for_tests();
        let codec = IncrementCounterContext::for_local().unwrap();
        let family = counter("Counter1");

        let mut shared = codec.create_at(1);
        codec.update(&mut shared, &node(1), 5).unwrap();
        codec.update(&mut shared, &node(2), 3).unwrap();
        family
            .add_column(Column::live(
                b"shared".to_vec(),
                8i64.to_be_bytes().to_vec(),
                Clock::IncrementCounter(shared),
            ))
            .unwrap();

        let mut lone = codec.create_at(1);
        codec.update(&mut lone, &node(2), 9).unwrap();
        family
            .add_column(Column::live(
                b"lone".to_vec(),
                9i64.to_be_bytes().to_vec(),
                Clock::IncrementCounter(lone),
            ))
            .unwrap();

        let cleaned = family.clean_context(&node(2)).unwrap();
        assert_eq!(cleaned.len(), 1);
        match cleaned.column(b"shared").unwrap().as_ref() {
            ColumnEntry::Column(c) => {
                let ctx = c.clock().context().unwrap();
                assert_eq!(codec.tuple_count(ctx).unwrap(), 1);
            }
            _ => panic!("expected a plain column"),
        }
    }

    #[test]
    fn family_serialization_roundtrip() {
        let schema = Schema::builder()
            .family("Standard1", ColumnFamilyType::STANDARD, "bytes")
            .build()
            .unwrap();

        let family = standard("Standard1");
        family
            .add_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)))
            .unwrap();
        family
            .add_column(Column::tombstone(b"b".to_vec(), Clock::Timestamp(2), 60))
            .unwrap();
        family.delete(&Clock::Timestamp(1), 30).unwrap();

        let mut bytes = Vec::new();
        family.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), family.size());

        let back = ColumnFamily::deserialize(&mut bytes.as_slice(), &schema).unwrap();
        assert_eq!(back, family);

        let unknown_schema = Schema::builder().build().unwrap();
        assert!(matches!(
            ColumnFamily::deserialize(&mut bytes.as_slice(), &unknown_schema),
            Err(StoreError::UnknownFamily(_))
        ));
    }

    #[test]
    fn super_family_merges_subcolumns() {
        let family = ColumnFamily::new(
            "Super1",
            ColumnFamilyType::SUPER,
            Arc::new(BytesComparator) as Arc<dyn NameComparator>,
        );

        let mut first = SuperColumn::new(b"s".to_vec(), ClockKind::Timestamp);
        first.push_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)));
        family.add_column(first).unwrap();

        let mut second = SuperColumn::new(b"s".to_vec(), ClockKind::Timestamp);
        second.push_column(Column::live(b"b".to_vec(), b"2".to_vec(), Clock::Timestamp(2)));
        family.add_column(second).unwrap();

        match family.column(b"s").unwrap().as_ref() {
            ColumnEntry::Super(sc) => {
                assert_eq!(sc.len(), 2);
            }
            _ => panic!("expected a super column"),
        }
    }
}
