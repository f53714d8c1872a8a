#![no_main]

// Harness: context_update.
// Strategy: apply an arbitrary update sequence and check the structural
// invariants: one tuple per id, the touched tuple in front, layout intact,
// total equal to the summed deltas.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sediment_core::clock::context::IncrementCounterContext;
use sediment_core::types::NodeId;
use std::collections::HashMap;

#[derive(Arbitrary, Debug)]
struct UpdateSequence {
    updates: Vec<(u8, i32)>,
}

fuzz_target!(|seq: UpdateSequence| {
    let codec = IncrementCounterContext::new(4);
    let mut ctx = codec.create();
    let mut sums: HashMap<u32, i64> = HashMap::new();

    for (id, delta) in &seq.updates {
        let id = *id as u32 + 1;
        let node = NodeId::new(id.to_be_bytes().to_vec()).unwrap();
        codec.update(&mut ctx, &node, *delta as i64).unwrap();
        *sums.entry(id).or_insert(0) += *delta as i64;

        let tuples = codec.tuples(&ctx).unwrap();
        assert_eq!(tuples.len(), sums.len());
        assert_eq!(tuples[0].0, node.as_bytes());
        assert_eq!(tuples[0].1, sums[&id]);
    }

    let expected: i64 = sums.values().sum();
    assert_eq!(codec.total(&ctx).unwrap(), expected);
});
