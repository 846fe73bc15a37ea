//! Pagination benchmarks.
//!
//! Reads deep into a seeded timeline with offset and keyset cursors.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use feed_bench::{follower_id, seed_posts, store_with_followers};
use feed_core::{FanoutEngine, FeedReader, PaginationMode, ReaderConfig, UserId};
use std::sync::Arc;
use tokio::runtime::Runtime;

const POSTS: usize = 5_000;

fn bench_deep_page(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(store_with_followers(1)).unwrap();
    let engine = FanoutEngine::new(Arc::clone(&store));
    rt.block_on(seed_posts(&engine, POSTS)).unwrap();
    let user = UserId::new(follower_id(0));

    let mut group = c.benchmark_group("deep_page");
    for mode in [PaginationMode::Offset, PaginationMode::Keyset] {
        let reader = FeedReader::with_config(
            Arc::clone(&store),
            ReaderConfig {
                mode,
                ..ReaderConfig::default()
            },
        );

        // Walk to page 200 once to obtain a cursor deep in the timeline
        let mut cursor: Option<String> = None;
        for _ in 0..200 {
            let page = rt
                .block_on(reader.get_feed(Some(&user), Some(20), cursor.as_deref()))
                .unwrap();
            cursor = page.next_cursor;
        }

        let label = match mode {
            PaginationMode::Offset => "offset",
            PaginationMode::Keyset => "keyset",
        };
        group.bench_with_input(BenchmarkId::from_parameter(label), &cursor, |b, cursor| {
            b.to_async(&rt).iter(|| async {
                reader
                    .get_feed(Some(&user), Some(20), black_box(cursor.as_deref()))
                    .await
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_deep_page);
criterion_main!(benches);
