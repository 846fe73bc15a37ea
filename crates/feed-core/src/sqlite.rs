//! SQLite-backed timeline store.
//!
//! Connections live in a bounded `deadpool` pool; each unit of work checks one
//! out and runs on the blocking thread pool. Concurrent fan-outs for the same
//! `(user_id, post_id)` are serialized by the database through
//! `ON CONFLICT DO NOTHING`, not by application locks.

use async_trait::async_trait;
use chrono::DateTime;
use deadpool_sqlite::{Config, Hook, HookError, Pool, Runtime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entry::{FollowEdge, TimelineEntry, UserId};
use crate::store::{PagePosition, PageQuery, StoreError, StoreTransaction, TimelineStore};

/// Path value selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const SCHEMA: &str = r#"
-- Follow edges. Owned by the identity service; created here only so a
-- standalone database is usable.
CREATE TABLE IF NOT EXISTS follows (
    follower_id TEXT NOT NULL,
    followee_id TEXT NOT NULL,
    PRIMARY KEY (follower_id, followee_id)
);
CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);

-- Timeline pointers
CREATE TABLE IF NOT EXISTS feed_entries (
    user_id TEXT NOT NULL,
    post_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, post_id)
);
CREATE INDEX IF NOT EXISTS idx_feed_user_time
    ON feed_entries(user_id, created_at DESC, post_id DESC);
CREATE INDEX IF NOT EXISTS idx_feed_time
    ON feed_entries(created_at DESC, post_id DESC, user_id DESC);
"#;

const INSERT_ENTRY: &str = "INSERT INTO feed_entries (user_id, post_id, created_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT (user_id, post_id) DO NOTHING";

const SELECT_FOLLOWERS: &str = "SELECT follower_id FROM follows WHERE followee_id = ?1";

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, or [`MEMORY_PATH`].
    pub path: PathBuf,
    /// Maximum number of open connections.
    pub pool_size: usize,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            pool_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Timeline store on SQLite.
#[derive(Clone)]
pub struct SqliteTimelineStore {
    pool: Pool,
}

impl SqliteTimelineStore {
    /// Open or create a database.
    ///
    /// Connections are opened on first use and configured by the pool's
    /// post-create hook. In-memory databases are private to one connection,
    /// so they always get a pool of one.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built.
    pub fn open(config: &SqliteConfig) -> Result<Self, StoreError> {
        let size = if config.path == Path::new(MEMORY_PATH) {
            if config.pool_size > 1 {
                warn!(
                    pool_size = config.pool_size,
                    "In-memory database is limited to a single connection"
                );
            }
            1
        } else {
            config.pool_size.max(1)
        };

        let pool = build_pool(&config.path, size, config.busy_timeout)?;
        info!(path = %config.path.display(), pool_size = size, "Opened timeline store");
        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built.
    pub fn in_memory() -> Result<Self, StoreError> {
        let busy_timeout = SqliteConfig::default().busy_timeout;
        Ok(Self {
            pool: build_pool(Path::new(MEMORY_PATH), 1, busy_timeout)?,
        })
    }

    /// Largest number of connections the store keeps open.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.pool.status().max_size
    }

    /// Record follow edges.
    ///
    /// The follow relation belongs to the identity service; this exists for
    /// seeding standalone databases, benchmarks and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_follows(&self, edges: Vec<FollowEdge>) -> Result<usize, StoreError> {
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)
                     ON CONFLICT DO NOTHING",
                )?;
                for edge in &edges {
                    inserted += stmt.execute(params![
                        edge.follower_id.as_str(),
                        edge.followee_id.as_str()
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Count stored entries, optionally for a single post.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_entries(&self, post: Option<&str>) -> Result<u64, StoreError> {
        let post = post.map(str::to_string);
        self.with_connection(move |conn| {
            let count: i64 = match post {
                Some(post) => conn.query_row(
                    "SELECT COUNT(*) FROM feed_entries WHERE post_id = ?1",
                    params![post],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM feed_entries", [], |row| row.get(0))?,
            };
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Run `f` on a pooled connection on the blocking thread pool.
    ///
    /// The pooled object goes back to the pool when dropped, also when the
    /// calling future is cancelled while `f` still runs.
    async fn with_connection<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        conn.interact(f)
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn build_pool(path: &Path, size: usize, busy_timeout: Duration) -> Result<Pool, StoreError> {
    Config::new(path)
        .builder(Runtime::Tokio1)
        .map_err(|e| StoreError::Pool(e.to_string()))?
        .max_size(size)
        .post_create(Hook::async_fn(move |conn, _| {
            Box::pin(async move {
                conn.interact(move |conn| configure(conn, busy_timeout))
                    .await
                    .map_err(|e| HookError::Message(e.to_string().into()))?
                    .map_err(HookError::Backend)
            })
        }))
        .build()
        .map_err(|e| StoreError::Pool(e.to_string()))
}

/// Per-connection setup run once after the pool opens a connection.
fn configure(conn: &mut Connection, busy_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    debug!(journal_mode = %mode, "Configured connection");
    conn.execute_batch(SCHEMA)
}

/// One open transaction.
struct SqliteTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn followers_of(
        &self,
        author: &UserId,
        chunk_size: usize,
        visit: &mut dyn FnMut(Vec<UserId>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let chunk_size = chunk_size.max(1);
        let mut stmt = self.tx.prepare_cached(SELECT_FOLLOWERS)?;
        let mut rows = stmt.query(params![author.as_str()])?;

        let mut chunk = Vec::with_capacity(chunk_size);
        while let Some(row) = rows.next()? {
            chunk.push(UserId::new(row.get::<_, String>(0)?));
            if chunk.len() == chunk_size {
                visit(std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size)))?;
            }
        }
        if !chunk.is_empty() {
            visit(chunk)?;
        }
        Ok(())
    }

    fn insert_entries(&self, entries: &[TimelineEntry]) -> Result<usize, StoreError> {
        let mut stmt = self.tx.prepare_cached(INSERT_ENTRY)?;
        let mut inserted = 0;
        for entry in entries {
            inserted += stmt.execute(params![
                entry.user_id.as_str(),
                entry.post_id.as_str(),
                entry.created_at_ms()
            ])?;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl TimelineStore for SqliteTimelineStore {
    async fn transaction<F, R>(&self, work: F) -> Result<R, StoreError>
    where
        F: FnOnce(&dyn StoreTransaction) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        self.with_connection(move |conn| {
            // Take the write lock up front so a later read-to-write upgrade
            // cannot fail on a stale WAL snapshot.
            let tx = SqliteTransaction {
                tx: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
            };
            let result = work(&tx)?;
            tx.tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn fetch_page(&self, query: PageQuery) -> Result<Vec<TimelineEntry>, StoreError> {
        self.with_connection(move |conn| {
            let mut sql = String::from("SELECT user_id, post_id, created_at FROM feed_entries");
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<Value> = Vec::new();

            if let Some(user) = &query.user {
                clauses.push("user_id = ?");
                args.push(Value::Text(user.to_string()));
            }

            let offset = match &query.position {
                PagePosition::Offset(offset) => i64::try_from(*offset).unwrap_or(i64::MAX),
                PagePosition::After(pos) => {
                    clauses.push("(created_at, post_id, user_id) < (?, ?, ?)");
                    args.push(Value::Integer(pos.created_at_ms));
                    args.push(Value::Text(pos.post_id.clone()));
                    args.push(Value::Text(pos.user_id.clone()));
                    0
                }
            };

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at DESC, post_id DESC, user_id DESC LIMIT ? OFFSET ?");
            args.push(Value::Integer(i64::from(query.limit)));
            args.push(Value::Integer(offset));

            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(user_id, post_id, ms)| -> Result<TimelineEntry, StoreError> {
                    let created_at = DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                        StoreError::InvalidRow(format!("created_at {ms} out of range"))
                    })?;
                    Ok(TimelineEntry::new(user_id, post_id, created_at))
                })
                .collect()
        })
        .await
    }
}
