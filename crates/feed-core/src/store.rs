//! Storage abstraction for timeline pointers and follow edges.
//!
//! Fan-out runs as a unit of work against a [`StoreTransaction`]: follower
//! resolution and bulk insert either both commit or both roll back.

use async_trait::async_trait;
use feed_protocol::KeysetPosition;
use thiserror::Error;

use crate::entry::{TimelineEntry, UserId};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected a statement or transaction.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be mapped to the domain.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// No connection could be handed out.
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// The blocking worker running the statement failed.
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Where a page starts in the descending `(created_at, post_id, user_id)` scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePosition {
    /// Skip this many rows.
    Offset(u64),
    /// Start strictly below this row.
    After(KeysetPosition),
}

impl Default for PagePosition {
    fn default() -> Self {
        PagePosition::Offset(0)
    }
}

/// A page request against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Timeline owner; `None` reads every timeline.
    pub user: Option<UserId>,
    /// Maximum number of rows.
    pub limit: u32,
    /// Start of the page.
    pub position: PagePosition,
}

impl PageQuery {
    /// First page of a user's timeline.
    #[must_use]
    pub fn first(user: Option<UserId>, limit: u32) -> Self {
        Self {
            user,
            limit,
            position: PagePosition::default(),
        }
    }
}

/// Operations available inside one atomic unit of work.
pub trait StoreTransaction {
    /// Visit the followers of `author` in chunks of at most `chunk_size`.
    ///
    /// The scan is lazy and finite, and restarts from scratch on each call.
    /// No ordering is guaranteed. An error returned by `visit` aborts the scan.
    fn followers_of(
        &self,
        author: &UserId,
        chunk_size: usize,
        visit: &mut dyn FnMut(Vec<UserId>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    /// Insert entries, ignoring any whose `(user_id, post_id)` already exists.
    ///
    /// Returns the number of rows actually inserted.
    fn insert_entries(&self, entries: &[TimelineEntry]) -> Result<usize, StoreError>;
}

/// Durable storage of timeline pointers.
#[async_trait]
pub trait TimelineStore: Send + Sync + 'static {
    /// Run `work` inside one transaction.
    ///
    /// Commits if `work` returns `Ok`, rolls back otherwise. Partial effects
    /// are never observable.
    async fn transaction<F, R>(&self, work: F) -> Result<R, StoreError>
    where
        F: FnOnce(&dyn StoreTransaction) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static;

    /// Fetch up to `query.limit` entries ordered by `created_at` descending.
    async fn fetch_page(&self, query: PageQuery) -> Result<Vec<TimelineEntry>, StoreError>;

    /// Collect every follower of `author`.
    async fn followers_of(&self, author: &UserId) -> Result<Vec<UserId>, StoreError> {
        let author = author.clone();
        self.transaction(move |tx| {
            let mut all = Vec::new();
            tx.followers_of(&author, 1024, &mut |chunk| {
                all.extend(chunk);
                Ok(())
            })?;
            Ok(all)
        })
        .await
    }

    /// Insert entries in their own transaction. Safe to repeat.
    async fn insert_entries(&self, entries: Vec<TimelineEntry>) -> Result<usize, StoreError> {
        self.transaction(move |tx| tx.insert_entries(&entries)).await
    }
}
