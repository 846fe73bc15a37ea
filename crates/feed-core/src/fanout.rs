//! Fan-out-on-write of timeline pointers.
//!
//! Given an author and a post, the engine writes one pointer into the
//! timeline of every follower. The whole operation is one transaction and is
//! safe to repeat: a replay inserts nothing.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::entry::{PostId, TimelineEntry, UserId};
use crate::metrics;
use crate::store::{StoreError, TimelineStore};

/// Default number of followers resolved and inserted per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Fan-out errors.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Request is missing an identifier.
    #[error("Invalid fan-out request: {0}")]
    Invalid(&'static str),

    /// The transaction failed and was rolled back.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Result of a committed fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Followers resolved.
    pub followers: u64,
    /// Entries newly inserted. Lower than `followers` on replays.
    pub inserted: u64,
}

impl FanoutReport {
    /// Entries that already existed.
    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.followers - self.inserted
    }
}

/// Writes timeline pointers for every follower of an author.
pub struct FanoutEngine<S> {
    store: Arc<S>,
    chunk_size: usize,
}

impl<S: TimelineStore> FanoutEngine<S> {
    /// Create an engine with the default chunk size.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set how many followers are inserted per batch.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Get the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Fan a post out to the author's followers.
    ///
    /// Succeeds with zero entries when the author has no followers.
    ///
    /// # Errors
    ///
    /// Returns an error if an identifier is empty or the transaction fails;
    /// in the latter case nothing was written and the caller may retry.
    pub async fn fanout(
        &self,
        author: &UserId,
        post: &PostId,
        created_at: DateTime<Utc>,
    ) -> Result<FanoutReport, FanoutError> {
        if author.is_empty() {
            return Err(FanoutError::Invalid("author id is empty"));
        }
        if post.is_empty() {
            return Err(FanoutError::Invalid("post id is empty"));
        }

        let start = Instant::now();
        let chunk_size = self.chunk_size;
        let author_id = author.clone();
        let post_id = post.clone();

        let result = self
            .store
            .transaction(move |tx| {
                let mut report = FanoutReport::default();
                tx.followers_of(&author_id, chunk_size, &mut |followers| {
                    report.followers += followers.len() as u64;
                    let entries: Vec<TimelineEntry> = followers
                        .into_iter()
                        .map(|user_id| TimelineEntry::new(user_id, post_id.clone(), created_at))
                        .collect();
                    report.inserted += tx.insert_entries(&entries)? as u64;
                    Ok(())
                })?;
                Ok(report)
            })
            .await;

        let elapsed = start.elapsed().as_secs_f64();
        match result {
            Ok(report) => {
                metrics::record_fanout("ok", report.inserted, elapsed);
                if report.followers == 0 {
                    debug!(author = %author, post = %post, "Author has no followers");
                } else {
                    info!(
                        author = %author,
                        post = %post,
                        followers = report.followers,
                        inserted = report.inserted,
                        "Fanned out post"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                metrics::record_fanout("error", 0, elapsed);
                error!(author = %author, post = %post, error = %e, "Fan-out rolled back");
                Err(e.into())
            }
        }
    }
}
