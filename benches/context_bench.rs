use criterion::{criterion_group, criterion_main, Criterion};
use sediment_core::clock::context::{IncrementCounterContext, StandardCounterContext};
use sediment_core::types::NodeId;

fn node(n: u32) -> NodeId {
    NodeId::new(n.to_be_bytes().to_vec()).unwrap()
}

fn context_benchmarks(c: &mut Criterion) {
    let codec = IncrementCounterContext::new(4);
    let local = node(1);

    c.bench_function("increment_update_hot_tuple", |b| {
        let mut ctx = codec.create();
        codec.update(&mut ctx, &local, 1).unwrap();
        b.iter(|| {
            codec.update(&mut ctx, &local, 1).unwrap();
        })
    });

    c.bench_function("increment_update_rotating", |b| {
        let mut ctx = codec.create();
        for id in 1..16u32 {
            codec.update(&mut ctx, &node(id), 1).unwrap();
        }
        let mut turn = 1u32;
        b.iter(|| {
            turn = if turn == 15 { 1 } else { turn + 1 };
            codec.update(&mut ctx, &node(turn), 1).unwrap();
        })
    });

    let contexts: Vec<Vec<u8>> = (0..5)
        .map(|i| {
            let mut ctx = codec.create_at(i);
            for id in 1..10u32 {
                codec.update(&mut ctx, &node(id * (i as u32 + 1)), i + 7).unwrap();
            }
            ctx
        })
        .collect();
    let refs: Vec<&[u8]> = contexts.iter().map(|c| c.as_slice()).collect();

    c.bench_function("increment_merge_five_way", |b| {
        b.iter(|| codec.merge(&refs, &local).unwrap())
    });

    let signed = StandardCounterContext::new(4);
    c.bench_function("standard_update_signed", |b| {
        let mut ctx = signed.create();
        let mut delta = 1i64;
        b.iter(|| {
            delta = -delta;
            signed.update(&mut ctx, &local, delta).unwrap();
        })
    });
}

criterion_group!(benches, context_benchmarks);
criterion_main!(benches);
