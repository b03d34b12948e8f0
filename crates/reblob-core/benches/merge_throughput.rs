use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use prost::Message;
use reblob_core::format::pbf::encode_blob;
use reblob_core::format::pbf::messages::{
    DenseInfo, DenseNodes, PrimitiveBlock, PrimitiveGroup, StringTable,
};
use reblob_core::{BlockAccumulator, BlockPool, Compression};

/// A dense-node block with `nodes` entries, each tagged from a per-block
/// string table that overlaps with its neighbours.
fn dense_block(seed: usize, nodes: usize) -> PrimitiveBlock {
    let mut strings = vec![Vec::new()];
    strings.extend((0..64).map(|i| format!("key-{}", (seed + i) % 96).into_bytes()));
    let last = strings.len() as i32 - 1;

    let mut keys_vals = Vec::with_capacity(nodes * 5);
    for i in 0..nodes as i32 {
        keys_vals.extend([1 + i % last, 1 + (i * 7) % last, 1 + (i * 3) % last, 1 + i % 5, 0]);
    }
    PrimitiveBlock {
        stringtable: StringTable { s: strings },
        primitivegroup: vec![PrimitiveGroup {
            dense: Some(DenseNodes {
                id: vec![1; nodes],
                lat: vec![3; nodes],
                lon: vec![5; nodes],
                keys_vals,
                denseinfo: Some(DenseInfo {
                    version: vec![1; nodes],
                    timestamp: vec![60; nodes],
                    changeset: vec![0; nodes],
                    uid: vec![0; nodes],
                    user_sid: (0..nodes).map(|i| if i % 2 == 0 { 2 } else { -2 }).collect(),
                    visible: Vec::new(),
                }),
            }),
            ..Default::default()
        }],
        granularity: Some(100),
        date_granularity: Some(1000),
        ..Default::default()
    }
}

fn bench_accumulator(c: &mut Criterion) {
    let blocks: Vec<_> = (0..64).map(|seed| dense_block(seed, 200)).collect();
    let total: usize = blocks.iter().map(Message::encoded_len).sum();
    let pool = BlockPool::new(0, 128);

    let mut group = c.benchmark_group("accumulator");
    group.throughput(Throughput::Bytes(total as u64));
    for cap in [64 * 1024, 1024 * 1024, 16 * 1024 * 1024] {
        group.bench_with_input(BenchmarkId::new("push", cap), &cap, |b, &cap| {
            b.iter(|| {
                let mut accumulator = BlockAccumulator::new(cap);
                for block in &blocks {
                    if let Ok(Some(done)) = accumulator.push(pool.adopt(block.clone())) {
                        black_box(done);
                    }
                }
                black_box(accumulator.finish());
            })
        });
    }
    group.finish();
}

fn bench_blob_encoding(c: &mut Criterion) {
    let payload = dense_block(0, 8_000).encode_to_vec();

    let mut group = c.benchmark_group("encode_blob");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    for compression in Compression::ALL {
        group.bench_with_input(
            BenchmarkId::from_parameter(compression),
            &compression,
            |b, &compression| {
                let mut out = Vec::with_capacity(payload.len());
                b.iter(|| {
                    out.clear();
                    encode_blob(black_box(&payload), compression, &mut out)
                        .expect("encode blob");
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_accumulator, bench_blob_encoding);
criterion_main!(benches);
