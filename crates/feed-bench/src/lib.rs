//! Fixtures shared by the feed benchmarks.

use chrono::{TimeZone, Utc};
use feed_core::{FanoutEngine, FollowEdge, PostId, SqliteTimelineStore, StoreError, UserId};
use std::sync::Arc;

/// Author every benchmark fixture posts as.
pub const AUTHOR: &str = "author-0";

/// Open an in-memory store where `followers` users follow [`AUTHOR`].
///
/// # Errors
///
/// Returns an error if the store cannot be created or seeded.
pub async fn store_with_followers(followers: usize) -> Result<Arc<SqliteTimelineStore>, StoreError> {
    let store = SqliteTimelineStore::in_memory()?;
    let edges: Vec<FollowEdge> = (0..followers)
        .map(|i| FollowEdge::new(follower_id(i), AUTHOR))
        .collect();
    store.insert_follows(edges).await?;
    Ok(Arc::new(store))
}

/// Name of the `i`-th follower.
#[must_use]
pub fn follower_id(i: usize) -> String {
    format!("user-{i:06}")
}

/// Fan out `posts` posts by [`AUTHOR`], one second apart.
///
/// # Errors
///
/// Returns an error if a fan-out fails.
pub async fn seed_posts(
    engine: &FanoutEngine<SqliteTimelineStore>,
    posts: usize,
) -> Result<(), feed_core::FanoutError> {
    let author = UserId::new(AUTHOR);
    for i in 0..posts {
        let created_at = Utc
            .timestamp_millis_opt(1_700_000_000_000 + (i as i64) * 1000)
            .single()
            .unwrap_or_else(Utc::now);
        engine
            .fanout(&author, &PostId::new(format!("post-{i:06}")), created_at)
            .await?;
    }
    Ok(())
}
