#![no_main]

// Harness: column_roundtrip.
// Strategy: build a column from arbitrary parts, encode, decode, and require
// bit-exact equality plus an exact size() contract.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sediment_core::clock::Clock;
use sediment_core::column::Column;
use sediment_core::types::ClockKind;

#[derive(Arbitrary, Debug)]
struct ColumnParts {
    name: Vec<u8>,
    value: Vec<u8>,
    timestamp: i64,
    deleted: bool,
    deletion_time: i32,
}

fuzz_target!(|parts: ColumnParts| {
    if parts.name.len() > u16::MAX as usize {
        return;
    }
    let column = if parts.deleted {
        Column::tombstone(
            parts.name.clone(),
            Clock::Timestamp(parts.timestamp),
            parts.deletion_time,
        )
    } else {
        Column::live(
            parts.name.clone(),
            parts.value.clone(),
            Clock::Timestamp(parts.timestamp),
        )
    };

    let mut bytes = Vec::new();
    column.serialize(&mut bytes).unwrap();
    assert_eq!(bytes.len(), column.size());

    let back = Column::deserialize(ClockKind::Timestamp, &mut bytes.as_slice()).unwrap();
    assert_eq!(back, column);
});
