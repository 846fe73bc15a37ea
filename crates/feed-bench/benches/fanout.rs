//! Fan-out benchmarks.
//!
//! Measures one post fanned out to followers of different sizes, and the
//! cost of a duplicate delivery once the entries exist.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use feed_bench::{store_with_followers, AUTHOR};
use feed_core::{FanoutEngine, PostId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Runtime;

fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");
    group.sample_size(20);

    for followers in [10usize, 100, 1_000, 10_000] {
        let store = rt.block_on(store_with_followers(followers)).unwrap();
        let engine = FanoutEngine::new(store);
        let author = UserId::new(AUTHOR);
        let next_post = AtomicU64::new(0);

        group.throughput(Throughput::Elements(followers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(followers), &followers, |b, _| {
            b.to_async(&rt).iter(|| async {
                let post = PostId::new(format!("p{}", next_post.fetch_add(1, Ordering::Relaxed)));
                engine.fanout(&author, &post, Utc::now()).await.unwrap()
            })
        });
    }

    group.finish();
}

fn bench_duplicate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(store_with_followers(1_000)).unwrap();
    let engine = FanoutEngine::new(store);
    let author = UserId::new(AUTHOR);
    let post = PostId::new("dup");
    let created_at = Utc::now();
    rt.block_on(engine.fanout(&author, &post, created_at)).unwrap();

    c.bench_function("fanout/duplicate_1000", |b| {
        b.to_async(&rt)
            .iter(|| async { engine.fanout(&author, &post, created_at).await.unwrap() })
    });
}

fn bench_chunk_size(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout_chunk");
    group.sample_size(20);

    for chunk in [50usize, 500, 5_000] {
        let store = rt.block_on(store_with_followers(5_000)).unwrap();
        let engine = FanoutEngine::new(store).with_chunk_size(chunk);
        let author = UserId::new(AUTHOR);
        let next_post = AtomicU64::new(0);

        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, _| {
            b.to_async(&rt).iter(|| async {
                let post = PostId::new(format!("p{}", next_post.fetch_add(1, Ordering::Relaxed)));
                engine.fanout(&author, &post, Utc::now()).await.unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_duplicate, bench_chunk_size);
criterion_main!(benches);
