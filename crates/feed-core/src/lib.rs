//! # feed-core
//!
//! Timeline storage, fan-out and paginated reads for the feed service.
//!
//! This crate provides:
//!
//! - **TimelineStore** - Transactional storage of timeline pointers
//! - **FanoutEngine** - Idempotent fan-out-on-write to every follower
//! - **FeedReader** - Cursor-paginated timeline reads
//! - **FeedService** - Request-facing reads and the synchronous post trigger
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ EventConsumer │────▶│ FanoutEngine │────▶│ TimelineStore │
//! └───────────────┘     └──────────────┘     └───────────────┘
//!                              ▲                     ▲
//! ┌───────────────┐            │              ┌──────┴───────┐
//! │  FeedService  │────────────┴─────────────▶│  FeedReader  │
//! └───────────────┘                           └──────────────┘
//! ```

pub mod entry;
pub mod fanout;
pub mod metrics;
pub mod reader;
pub mod service;
pub mod sqlite;
pub mod store;

pub use entry::{FollowEdge, PostId, TimelineEntry, UserId};
pub use fanout::{FanoutEngine, FanoutError, FanoutReport};
pub use reader::{FeedError, FeedPage, FeedReader, PaginationMode, ReaderConfig};
pub use service::{FeedService, NewPost, RequestContext};
pub use sqlite::{SqliteConfig, SqliteTimelineStore};
pub use store::{PagePosition, PageQuery, StoreError, StoreTransaction, TimelineStore};
