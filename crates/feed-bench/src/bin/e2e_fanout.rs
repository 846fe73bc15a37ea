//! End-to-end fan-out throughput.
//!
//! Publishes post-created notifications to an in-process queue and measures
//! how fast the event consumer turns them into timeline entries.
//!
//! ```bash
//! cargo run --release -p feed-bench --bin e2e_fanout -- <posts> <followers>
//! ```

use feed_bench::{store_with_followers, AUTHOR};
use feed_consumer::{ConsumerConfig, EventConsumer, MemoryDeadLetters, MemoryQueue};
use feed_core::FanoutEngine;
use feed_protocol::PostCreated;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let posts: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1_000);
    let followers: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);

    println!("Feed end-to-end fan-out benchmark");
    println!("  posts: {posts}, followers per post: {followers}");
    println!();

    let store = match store_with_followers(followers).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to seed store: {e}");
            std::process::exit(1);
        }
    };
    let engine = Arc::new(FanoutEngine::new(Arc::clone(&store)));

    let queue = MemoryQueue::new();
    for i in 0..posts {
        let event = PostCreated::new(format!("post-{i}"), AUTHOR, 1_700_000_000_000 + i as i64);
        if let Err(e) = queue.publish_event(&event) {
            eprintln!("Failed to publish: {e}");
            std::process::exit(1);
        }
    }

    let dead_letters = MemoryDeadLetters::new();
    let consumer = EventConsumer::new(
        Box::new(queue.source()),
        engine,
        Arc::new(dead_letters.clone()),
        ConsumerConfig {
            poll_timeout: Duration::from_millis(50),
            ..ConsumerConfig::default()
        },
    );

    let cancel = CancellationToken::new();
    let start = Instant::now();
    let handle = tokio::spawn(consumer.run(cancel.clone()));

    while queue.acked() < posts as u64 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let elapsed = start.elapsed();
    cancel.cancel();

    let stats = match handle.await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            eprintln!("Consumer failed: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Consumer panicked: {e}");
            std::process::exit(1);
        }
    };

    let entries = store.count_entries(None).await.unwrap_or(0);
    let secs = elapsed.as_secs_f64();

    println!("Results");
    println!("  elapsed:        {:.2}s", secs);
    println!("  events applied: {}", stats.applied);
    println!("  dead letters:   {}", dead_letters.letters().len());
    println!("  entries:        {}", entries);
    println!("  events/sec:     {:.0}", posts as f64 / secs);
    println!("  entries/sec:    {:.0}", entries as f64 / secs);
}
