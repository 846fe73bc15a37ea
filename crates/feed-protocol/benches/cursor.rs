//! Cursor codec benchmarks for feed-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use feed_protocol::cursor::{self, Cursor, KeysetPosition};

fn bench_offset(c: &mut Criterion) {
    let token = cursor::encode_offset(1_000_000);

    let mut group = c.benchmark_group("offset");
    group.bench_function("encode", |b| {
        b.iter(|| cursor::encode_offset(black_box(1_000_000)))
    });
    group.bench_function("decode", |b| b.iter(|| cursor::decode(black_box(&token))));
    group.finish();
}

fn bench_keyset(c: &mut Criterion) {
    let position = Cursor::Keyset(KeysetPosition {
        created_at_ms: 1_700_000_000_000,
        post_id: "0190b1d2-7c3e-7a52-9d4f-6a2f1c7e8b90".to_string(),
        user_id: "0190b1d2-7c3e-7a52-9d4f-000000000001".to_string(),
    });
    let token = cursor::encode(&position);

    let mut group = c.benchmark_group("keyset");
    group.bench_function("encode", |b| b.iter(|| cursor::encode(black_box(&position))));
    group.bench_function("decode", |b| b.iter(|| cursor::decode(black_box(&token))));
    group.finish();
}

criterion_group!(benches, bench_offset, bench_keyset);
criterion_main!(benches);
