//!
//! The column model: immutable columns, super columns, and their wire codec.
//!
//! A column never changes after construction; the write path replaces whole
//! columns through reconciliation instead of mutating them. A deleted column
//! carries its local-deletion wall-clock (seconds) as a 4-byte value, used by
//! compaction GC.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::clock::{Clock, PartialOrder};
use crate::comparator::NameComparator;
use crate::error::StoreError;
use crate::types::{ClockKind, ColumnName};

/// Renders a name for error messages and logs.
pub(crate) fn display_name(name: &[u8]) -> String {
    match std::str::from_utf8(name) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => name.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

/// An immutable `(name, value, clock)` triple, possibly a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: ColumnName,
    value: Vec<u8>,
    clock: Clock,
    deleted: bool,
}

impl Column {
    pub fn live(name: ColumnName, value: Vec<u8>, clock: Clock) -> Self {
        Column {
            name,
            value,
            clock,
            deleted: false,
        }
    }

    /// A tombstone; the value is the 4-byte local-deletion time in epoch
    /// seconds.
    pub fn tombstone(name: ColumnName, clock: Clock, local_deletion_time: i32) -> Self {
        Column {
            name,
            value: local_deletion_time.to_be_bytes().to_vec(),
            clock,
            deleted: true,
        }
    }

    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The GC horizon of a tombstone; `None` for live columns.
    pub fn local_deletion_time(&self) -> Option<i32> {
        if !self.deleted {
            return None;
        }
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// The same column under a replacement clock; used when cleaning
    /// per-node counts out of counter contexts.
    pub fn with_clock(&self, clock: Clock) -> Column {
        Column {
            name: self.name.clone(),
            value: self.value.clone(),
            clock,
            deleted: self.deleted,
        }
    }

    /// Exact byte count produced by `serialize`.
    pub fn size(&self) -> usize {
        2 + self.name.len() + 1 + self.clock.size() + 4 + self.value.len()
    }

    /// `u16 name-length · name · u8 deletion-flag · clock · u32 value-length
    /// · value`
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        write_short_bytes(w, &self.name, "column name")?;
        w.write_u8(self.deleted as u8)?;
        self.clock.serialize(w)?;
        w.write_u32::<BigEndian>(self.value.len() as u32)?;
        w.write_all(&self.value)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(kind: ClockKind, r: &mut R) -> Result<Column, StoreError> {
        let name = read_short_bytes(r, "column name")?;
        let deleted = match r.read_u8()? {
            0 => false,
            1 => true,
            flag => {
                return Err(StoreError::CorruptFrame(format!(
                    "invalid deletion flag: {flag}"
                )))
            }
        };
        let clock = Clock::deserialize(kind, r)?;
        let len = r.read_u32::<BigEndian>()? as usize;
        let mut value = vec![0u8; len];
        r.read_exact(&mut value).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::CorruptFrame(format!("column value truncated before {len} bytes"))
            } else {
                err.into()
            }
        })?;
        Ok(Column {
            name,
            value,
            clock,
            deleted,
        })
    }

    /// Feeds this column into a read-response digest.
    pub fn update_digest(&self, digest: &mut md5::Context) -> Result<(), StoreError> {
        digest.consume(&self.name);
        digest.consume([self.deleted as u8]);
        digest.consume(self.clock.serialized()?);
        digest.consume(&self.value);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Super columns
// ─────────────────────────────────────────────────────────────────────────────

/// A named container of columns sharing one comparator and reconciler, with
/// its own tombstone pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperColumn {
    name: ColumnName,
    marked_for_delete_at: Clock,
    local_deletion_time: i32,
    columns: Vec<Column>,
}

impl SuperColumn {
    pub fn new(name: ColumnName, clock_kind: ClockKind) -> Self {
        SuperColumn {
            name,
            marked_for_delete_at: Clock::minimum(clock_kind),
            local_deletion_time: i32::MIN,
            columns: Vec::new(),
        }
    }

    pub fn from_parts(
        name: ColumnName,
        marked_for_delete_at: Clock,
        local_deletion_time: i32,
        columns: Vec<Column>,
    ) -> Self {
        SuperColumn {
            name,
            marked_for_delete_at,
            local_deletion_time,
            columns,
        }
    }

    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[inline]
    pub fn marked_for_delete_at(&self) -> &Clock {
        &self.marked_for_delete_at
    }

    #[inline]
    pub fn local_deletion_time(&self) -> i32 {
        self.local_deletion_time
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete_at != Clock::minimum(self.marked_for_delete_at.kind())
    }

    /// Appends a column. The caller maintains comparator order; merge and
    /// codec paths append in order by construction.
    pub fn push_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Looks a subcolumn up under the family's comparator.
    pub fn column(&self, name: &[u8], comparator: &dyn NameComparator) -> Option<&Column> {
        self.columns
            .binary_search_by(|c| comparator.compare(c.name(), name))
            .ok()
            .map(|at| &self.columns[at])
    }

    /// Raises the tombstone pair under atomic-max semantics. Disjoint clocks
    /// join through `superset` first.
    pub fn delete(&mut self, clock: &Clock, local_deletion_time: i32) -> Result<(), StoreError> {
        self.local_deletion_time = self.local_deletion_time.max(local_deletion_time);
        match self.marked_for_delete_at.compare(clock)? {
            PartialOrder::LessThan => self.marked_for_delete_at = clock.clone(),
            PartialOrder::Disjoint => {
                self.marked_for_delete_at =
                    Clock::superset(&[&self.marked_for_delete_at, clock])?;
            }
            PartialOrder::GreaterThan | PartialOrder::Equal => {}
        }
        Ok(())
    }

    /// Exact byte count produced by `serialize`.
    pub fn size(&self) -> usize {
        2 + self.name.len()
            + self.marked_for_delete_at.size()
            + 4
            + 4
            + self.columns.iter().map(Column::size).sum::<usize>()
    }

    /// `u16 name-length · name · tombstone clock · i32 deletion-time ·
    /// u32 count · columns`
    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        write_short_bytes(w, &self.name, "super column name")?;
        self.marked_for_delete_at.serialize(w)?;
        w.write_i32::<BigEndian>(self.local_deletion_time)?;
        w.write_u32::<BigEndian>(self.columns.len() as u32)?;
        for column in &self.columns {
            column.serialize(w)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(kind: ClockKind, r: &mut R) -> Result<SuperColumn, StoreError> {
        let name = read_short_bytes(r, "super column name")?;
        let marked_for_delete_at = Clock::deserialize(kind, r)?;
        let local_deletion_time = r.read_i32::<BigEndian>()?;
        let count = r.read_u32::<BigEndian>()? as usize;
        let mut columns = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            columns.push(Column::deserialize(kind, r)?);
        }
        Ok(SuperColumn {
            name,
            marked_for_delete_at,
            local_deletion_time,
            columns,
        })
    }

    pub fn update_digest(&self, digest: &mut md5::Context) -> Result<(), StoreError> {
        digest.consume(&self.name);
        digest.consume(self.marked_for_delete_at.serialized()?);
        digest.consume(self.local_deletion_time.to_be_bytes());
        for column in &self.columns {
            column.update_digest(digest)?;
        }
        Ok(())
    }
}

/// One slot in a column family: a plain column or a super column, decided by
/// the family type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnEntry {
    Column(Column),
    Super(SuperColumn),
}

impl ColumnEntry {
    #[inline]
    pub fn name(&self) -> &[u8] {
        match self {
            ColumnEntry::Column(c) => c.name(),
            ColumnEntry::Super(s) => s.name(),
        }
    }

    #[inline]
    pub fn is_super(&self) -> bool {
        matches!(self, ColumnEntry::Super(_))
    }

    pub fn size(&self) -> usize {
        match self {
            ColumnEntry::Column(c) => c.size(),
            ColumnEntry::Super(s) => s.size(),
        }
    }

    pub fn serialize<W: Write>(&self, w: &mut W) -> Result<(), StoreError> {
        match self {
            ColumnEntry::Column(c) => c.serialize(w),
            ColumnEntry::Super(s) => s.serialize(w),
        }
    }

    /// The family type decides the shape on the wire; no per-entry tag.
    pub fn deserialize<R: Read>(
        kind: ClockKind,
        is_super: bool,
        r: &mut R,
    ) -> Result<ColumnEntry, StoreError> {
        if is_super {
            Ok(ColumnEntry::Super(SuperColumn::deserialize(kind, r)?))
        } else {
            Ok(ColumnEntry::Column(Column::deserialize(kind, r)?))
        }
    }

    pub fn update_digest(&self, digest: &mut md5::Context) -> Result<(), StoreError> {
        match self {
            ColumnEntry::Column(c) => c.update_digest(digest),
            ColumnEntry::Super(s) => s.update_digest(digest),
        }
    }
}

impl From<Column> for ColumnEntry {
    fn from(column: Column) -> Self {
        ColumnEntry::Column(column)
    }
}

impl From<SuperColumn> for ColumnEntry {
    fn from(super_column: SuperColumn) -> Self {
        ColumnEntry::Super(super_column)
    }
}

fn write_short_bytes<W: Write>(w: &mut W, bytes: &[u8], what: &str) -> Result<(), StoreError> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| StoreError::CorruptFrame(format!("{what} of {} bytes", bytes.len())))?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_short_bytes<R: Read>(r: &mut R, what: &str) -> Result<Vec<u8>, StoreError> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytesComparator;

    #[test]
    fn column_roundtrip_timestamp() {
        let column = Column::live(b"name".to_vec(), b"value".to_vec(), Clock::Timestamp(42));
        let mut bytes = Vec::new();
        column.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), column.size());

        let back = Column::deserialize(ClockKind::Timestamp, &mut bytes.as_slice()).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn tombstone_carries_deletion_time() {
        let column = Column::tombstone(b"gone".to_vec(), Clock::Timestamp(9), 1_200_000);
        assert!(column.is_deleted());
        assert_eq!(column.local_deletion_time(), Some(1_200_000));
        assert_eq!(column.value(), 1_200_000i32.to_be_bytes());

        let mut bytes = Vec::new();
        column.serialize(&mut bytes).unwrap();
        let back = Column::deserialize(ClockKind::Timestamp, &mut bytes.as_slice()).unwrap();
        assert_eq!(back.local_deletion_time(), Some(1_200_000));
    }

    #[test]
    fn super_column_roundtrip() {
        let mut sc = SuperColumn::new(b"sc".to_vec(), ClockKind::Timestamp);
        sc.push_column(Column::live(b"a".to_vec(), b"1".to_vec(), Clock::Timestamp(1)));
        sc.push_column(Column::live(b"b".to_vec(), b"2".to_vec(), Clock::Timestamp(2)));

        let mut bytes = Vec::new();
        sc.serialize(&mut bytes).unwrap();
        assert_eq!(bytes.len(), sc.size());

        let back = SuperColumn::deserialize(ClockKind::Timestamp, &mut bytes.as_slice()).unwrap();
        assert_eq!(back, sc);
        assert!(back.column(b"b", &BytesComparator).is_some());
        assert!(back.column(b"c", &BytesComparator).is_none());
    }

    #[test]
    fn super_column_delete_is_an_atomic_max() {
        let mut sc = SuperColumn::new(b"sc".to_vec(), ClockKind::Timestamp);
        assert!(!sc.is_marked_for_delete());

        sc.delete(&Clock::Timestamp(10), 100).unwrap();
        assert!(sc.is_marked_for_delete());
        assert_eq!(sc.marked_for_delete_at(), &Clock::Timestamp(10));
        assert_eq!(sc.local_deletion_time(), 100);

        // An older delete never lowers the pair.
        sc.delete(&Clock::Timestamp(5), 50).unwrap();
        assert_eq!(sc.marked_for_delete_at(), &Clock::Timestamp(10));
        assert_eq!(sc.local_deletion_time(), 100);
    }

    #[test]
    fn corrupt_flag_is_rejected() {
        let column = Column::live(b"n".to_vec(), b"v".to_vec(), Clock::Timestamp(1));
        let mut bytes = Vec::new();
        column.serialize(&mut bytes).unwrap();
        bytes[2 + 1] = 7; // poke the deletion flag
        assert!(matches!(
            Column::deserialize(ClockKind::Timestamp, &mut bytes.as_slice()),
            Err(StoreError::CorruptFrame(_))
        ));
    }
}
