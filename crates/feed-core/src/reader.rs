//! Request-facing read path.
//!
//! A page is at most `limit` entries of the descending scan plus an optional
//! continuation token. A token is issued only when the page came back full, so
//! `has_more` can over-signal by one empty page.

use feed_protocol::cursor::{self, Cursor, CursorError, KeysetPosition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::entry::{TimelineEntry, UserId};
use crate::metrics;
use crate::store::{PagePosition, PageQuery, StoreError, TimelineStore};

/// Page size used when the request does not name one.
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest page size served.
pub const MAX_LIMIT: u32 = 100;

/// Read path errors.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request is malformed; retrying it unchanged will fail again.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<CursorError> for FeedError {
    fn from(e: CursorError) -> Self {
        FeedError::InvalidArgument(format!("invalid cursor: {e}"))
    }
}

/// How first pages are continued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// `o:<offset>` tokens.
    #[default]
    Offset,
    /// `k:<position>` tokens, stable under concurrent inserts.
    Keyset,
}

impl PaginationMode {
    fn label(self) -> &'static str {
        match self {
            PaginationMode::Offset => "offset",
            PaginationMode::Keyset => "keyset",
        }
    }
}

/// Reader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Page size used when a request gives no positive limit.
    pub default_limit: u32,
    /// Largest page size served; larger requests are clamped to it.
    pub max_limit: u32,
    /// Mode of tokens issued for first pages. Later pages keep the mode of
    /// the token they were requested with.
    pub mode: PaginationMode,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            mode: PaginationMode::Offset,
        }
    }
}

impl ReaderConfig {
    /// Resolve a requested page size.
    ///
    /// Absent or non-positive values give the default; the result is always
    /// within `1..=max_limit`.
    #[must_use]
    pub fn clamp_limit(&self, requested: Option<i64>) -> u32 {
        let max = self.max_limit.max(1);
        match requested {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX).min(max),
            _ => self.default_limit.clamp(1, max),
        }
    }
}

/// One page of a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    /// Entries, newest first.
    pub entries: Vec<TimelineEntry>,
    /// Token for the next page.
    pub next_cursor: Option<String>,
}

impl FeedPage {
    /// Whether a continuation token was issued.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Serves cursor-paginated timeline reads.
pub struct FeedReader<S> {
    store: Arc<S>,
    config: ReaderConfig,
}

impl<S: TimelineStore> FeedReader<S> {
    /// Create a reader with default settings.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, ReaderConfig::default())
    }

    /// Create a reader with the given settings.
    #[must_use]
    pub fn with_config(store: Arc<S>, config: ReaderConfig) -> Self {
        Self { store, config }
    }

    /// Get the reader settings.
    #[must_use]
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Read one page.
    ///
    /// `user` of `None` reads every timeline. An absent or blank `cursor`
    /// starts from the newest entry.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidArgument`] for a malformed cursor, before
    /// the store is touched, and [`FeedError::Storage`] if the query fails.
    pub async fn get_feed(
        &self,
        user: Option<&UserId>,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedError> {
        let limit = self.config.clamp_limit(limit);

        let (mode, position) = match cursor.map(str::trim).filter(|t| !t.is_empty()) {
            None => (self.config.mode, PagePosition::default()),
            Some(token) => match cursor::decode(token)? {
                Cursor::Offset(offset) => (PaginationMode::Offset, PagePosition::Offset(offset)),
                Cursor::Keyset(pos) => (PaginationMode::Keyset, PagePosition::After(pos)),
            },
        };

        let offset = match &position {
            PagePosition::Offset(offset) => *offset,
            PagePosition::After(_) => 0,
        };

        let entries = self
            .store
            .fetch_page(PageQuery {
                user: user.cloned(),
                limit,
                position,
            })
            .await?;

        let next_cursor = if entries.len() == limit as usize {
            match mode {
                PaginationMode::Offset => Some(cursor::encode_offset(
                    offset.saturating_add(u64::from(limit)),
                )),
                PaginationMode::Keyset => entries.last().map(|last| {
                    cursor::encode(&Cursor::Keyset(KeysetPosition {
                        created_at_ms: last.created_at_ms(),
                        post_id: last.post_id.to_string(),
                        user_id: last.user_id.to_string(),
                    }))
                }),
            }
        } else {
            None
        };

        metrics::record_page(mode.label());
        debug!(
            user = user.map(UserId::as_str).unwrap_or("*"),
            limit,
            returned = entries.len(),
            has_more = next_cursor.is_some(),
            "Served feed page"
        );

        Ok(FeedPage {
            entries,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteTimelineStore;
    use crate::store::StoreTransaction;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(user: &str, post: &str, ms: i64) -> TimelineEntry {
        TimelineEntry::new(user, post, DateTime::from_timestamp_millis(ms).unwrap())
    }

    async fn store_with(entries: Vec<TimelineEntry>) -> Arc<SqliteTimelineStore> {
        let store = SqliteTimelineStore::in_memory().unwrap();
        store.insert_entries(entries).await.unwrap();
        Arc::new(store)
    }

    fn posts(page: &FeedPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.post_id.as_str()).collect()
    }

    #[test]
    fn test_clamp_limit() {
        let config = ReaderConfig::default();
        assert_eq!(config.clamp_limit(None), 20);
        assert_eq!(config.clamp_limit(Some(0)), 20);
        assert_eq!(config.clamp_limit(Some(-5)), 20);
        assert_eq!(config.clamp_limit(Some(1)), 1);
        assert_eq!(config.clamp_limit(Some(100)), 100);
        assert_eq!(config.clamp_limit(Some(101)), 100);
        assert_eq!(config.clamp_limit(Some(i64::MAX)), 100);
    }

    #[test]
    fn test_pagination_mode_serde() {
        let mode: PaginationMode = serde_json::from_str(r#""keyset""#).unwrap();
        assert_eq!(mode, PaginationMode::Keyset);
        assert_eq!(serde_json::to_string(&PaginationMode::Offset).unwrap(), r#""offset""#);
    }

    #[tokio::test]
    async fn test_pages_one_at_a_time() {
        let store = store_with(vec![
            entry("U", "p1", 100),
            entry("U", "p2", 200),
            entry("U", "p3", 300),
        ])
        .await;
        let reader = FeedReader::new(store);
        let user = UserId::new("U");

        let first = reader.get_feed(Some(&user), Some(1), None).await.unwrap();
        assert_eq!(posts(&first), vec!["p3"]);
        assert!(first.has_more());

        let second = reader
            .get_feed(Some(&user), Some(1), first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(posts(&second), vec!["p2"]);
        assert!(second.has_more());

        let third = reader
            .get_feed(Some(&user), Some(1), second.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(posts(&third), vec!["p1"]);
        assert!(third.has_more());

        // The third page was full, so one empty page follows.
        let last = reader
            .get_feed(Some(&user), Some(1), third.next_cursor.as_deref())
            .await
            .unwrap();
        assert!(last.entries.is_empty());
        assert!(!last.has_more());
    }

    #[tokio::test]
    async fn test_short_page_has_no_cursor() {
        let store = store_with(vec![
            entry("U", "p1", 100),
            entry("U", "p2", 200),
            entry("U", "p3", 300),
        ])
        .await;
        let reader = FeedReader::new(store);
        let user = UserId::new("U");

        let first = reader.get_feed(Some(&user), Some(2), None).await.unwrap();
        assert_eq!(posts(&first), vec!["p3", "p2"]);
        assert_eq!(first.next_cursor.as_deref(), Some(cursor::encode_offset(2).as_str()));

        let second = reader
            .get_feed(Some(&user), Some(2), first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(posts(&second), vec!["p1"]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_global_feed_and_unknown_user() {
        let store = store_with(vec![entry("U1", "p1", 100), entry("U2", "p1", 100)]).await;
        let reader = FeedReader::new(store);

        let global = reader.get_feed(None, None, None).await.unwrap();
        assert_eq!(global.entries.len(), 2);
        assert!(!global.has_more());

        let nobody = reader
            .get_feed(Some(&UserId::new("ghost")), None, None)
            .await
            .unwrap();
        assert!(nobody.entries.is_empty());
    }

    #[tokio::test]
    async fn test_blank_cursor_starts_over() {
        let store = store_with(vec![entry("U", "p1", 100)]).await;
        let reader = FeedReader::new(store);

        let page = reader.get_feed(None, None, Some("  ")).await.unwrap();
        assert_eq!(posts(&page), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_keyset_survives_concurrent_insert() {
        let store = store_with(vec![
            entry("U", "p1", 100),
            entry("U", "p2", 200),
            entry("U", "p3", 300),
        ])
        .await;
        let reader = FeedReader::with_config(
            Arc::clone(&store),
            ReaderConfig {
                mode: PaginationMode::Keyset,
                ..ReaderConfig::default()
            },
        );
        let user = UserId::new("U");

        let first = reader.get_feed(Some(&user), Some(2), None).await.unwrap();
        assert_eq!(posts(&first), vec!["p3", "p2"]);

        // A newer entry lands between page fetches.
        store
            .insert_entries(vec![entry("U", "p4", 400)])
            .await
            .unwrap();

        let second = reader
            .get_feed(Some(&user), Some(2), first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(posts(&second), vec!["p1"]);
        assert!(!second.has_more());
    }

    #[tokio::test]
    async fn test_offset_cursor_keeps_offset_mode() {
        let store = store_with(vec![
            entry("U", "p1", 100),
            entry("U", "p2", 200),
            entry("U", "p3", 300),
        ])
        .await;
        let reader = FeedReader::with_config(
            store,
            ReaderConfig {
                mode: PaginationMode::Keyset,
                ..ReaderConfig::default()
            },
        );

        let page = reader
            .get_feed(None, Some(1), Some(&cursor::encode_offset(1)))
            .await
            .unwrap();
        assert_eq!(posts(&page), vec!["p2"]);
        assert_eq!(page.next_cursor, Some(cursor::encode_offset(2)));
    }

    /// Store that counts page reads.
    struct CountingStore {
        inner: SqliteTimelineStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl TimelineStore for CountingStore {
        async fn transaction<F, R>(&self, work: F) -> Result<R, StoreError>
        where
            F: FnOnce(&dyn StoreTransaction) -> Result<R, StoreError> + Send + 'static,
            R: Send + 'static,
        {
            self.inner.transaction(work).await
        }

        async fn fetch_page(&self, query: PageQuery) -> Result<Vec<TimelineEntry>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_page(query).await
        }
    }

    #[tokio::test]
    async fn test_malformed_cursor_does_not_touch_store() {
        let store = Arc::new(CountingStore {
            inner: SqliteTimelineStore::in_memory().unwrap(),
            reads: AtomicUsize::new(0),
        });
        let reader = FeedReader::new(Arc::clone(&store));

        for token in ["not-base64!!", "bzowMDc", "eDox"] {
            let result = reader.get_feed(None, None, Some(token)).await;
            assert!(
                matches!(result, Err(FeedError::InvalidArgument(_))),
                "token {token} accepted"
            );
        }
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);

        reader.get_feed(None, None, None).await.unwrap();
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }
}
