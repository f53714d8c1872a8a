#![no_main]

// Harness: context_decode.
// Strategy: feed arbitrary bytes to the context parsers; malformed layouts
// must come back as errors, never panics, and accepted contexts must expose
// a consistent tuple count and total.

use libfuzzer_sys::fuzz_target;
use sediment_core::clock::context::{IncrementCounterContext, StandardCounterContext};

fuzz_target!(|bytes: &[u8]| {
    let increment = IncrementCounterContext::new(4);
    if let Ok(tuples) = increment.tuples(bytes) {
        assert_eq!(tuples.len(), increment.tuple_count(bytes).unwrap());
        let _ = increment.total(bytes).unwrap();
    }

    let standard = StandardCounterContext::new(4);
    if let Ok(tuples) = standard.tuples(bytes) {
        assert_eq!(tuples.len(), standard.tuple_count(bytes).unwrap());
        let _ = standard.total(bytes).unwrap();
    }
});
