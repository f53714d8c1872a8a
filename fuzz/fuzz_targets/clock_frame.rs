#![no_main]

// Harness: clock_frame.
// Strategy: feed arbitrary bytes to the length-prefixed clock decoder; any
// accepted frame must re-encode to the consumed bytes.

use libfuzzer_sys::fuzz_target;
use sediment_core::clock::Clock;
use sediment_core::types::ClockKind;

fuzz_target!(|bytes: &[u8]| {
    for kind in [
        ClockKind::Timestamp,
        ClockKind::IncrementCounter,
        ClockKind::StandardCounter,
    ] {
        let mut cursor = bytes;
        if let Ok(clock) = Clock::deserialize(kind, &mut cursor) {
            let consumed = bytes.len() - cursor.len();
            let re = clock.serialized().unwrap();
            assert_eq!(re.len(), clock.size());
            assert_eq!(&bytes[..consumed], &re[..]);
        }
    }
});
