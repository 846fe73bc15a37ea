//! Request-facing service: paginated reads and the synchronous post trigger.

use chrono::{DateTime, Utc};
use feed_protocol::api::{AddPostRequest, FeedEntry, GetFeedRequest, GetFeedResponse};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entry::{PostId, TimelineEntry, UserId};
use crate::fanout::{FanoutEngine, FanoutError, FanoutReport};
use crate::reader::{FeedError, FeedReader, ReaderConfig};
use crate::store::TimelineStore;

/// Identity of the caller, established by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    caller: UserId,
}

impl RequestContext {
    /// Create a context for an authenticated caller.
    #[must_use]
    pub fn new(caller: impl Into<UserId>) -> Self {
        Self {
            caller: caller.into(),
        }
    }

    /// The authenticated caller.
    #[must_use]
    pub fn caller(&self) -> &UserId {
        &self.caller
    }
}

/// A freshly created post, as handed over by the content service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub post_id: PostId,
    /// Free-form post text; carried through, not stored in timelines.
    pub caption: String,
    /// Opaque media identifier; never parsed here.
    pub media_ref: Option<String>,
    /// Media type of `media_ref`, as declared by the uploader.
    pub mime: Option<String>,
    /// Creation time; the current time is used when absent.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewPost {
    /// A post with no caption or media, stamped at fan-out time.
    #[must_use]
    pub fn new(post_id: impl Into<PostId>) -> Self {
        Self {
            post_id: post_id.into(),
            caption: String::new(),
            media_ref: None,
            mime: None,
            created_at: None,
        }
    }
}

impl TryFrom<AddPostRequest> for NewPost {
    type Error = FeedError;

    fn try_from(req: AddPostRequest) -> Result<Self, Self::Error> {
        let created_at = req
            .created_at_ms
            .map(|ms| {
                DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                    FeedError::InvalidArgument(format!("created_at_ms {ms} out of range"))
                })
            })
            .transpose()?;

        Ok(Self {
            post_id: PostId::new(req.post_id),
            caption: req.caption,
            media_ref: req.media_ref,
            mime: req.mime,
            created_at,
        })
    }
}

impl From<TimelineEntry> for FeedEntry {
    fn from(entry: TimelineEntry) -> Self {
        let created_at_ms = entry.created_at_ms();
        FeedEntry {
            user_id: entry.user_id.to_string(),
            post_id: entry.post_id.to_string(),
            created_at_ms,
        }
    }
}

/// Entry point for request-facing callers.
pub struct FeedService<S> {
    engine: Arc<FanoutEngine<S>>,
    reader: FeedReader<S>,
}

impl<S: TimelineStore> FeedService<S> {
    /// Create a service over a shared store.
    #[must_use]
    pub fn new(store: Arc<S>, reader: ReaderConfig, chunk_size: usize) -> Self {
        Self {
            engine: Arc::new(FanoutEngine::new(Arc::clone(&store)).with_chunk_size(chunk_size)),
            reader: FeedReader::with_config(store, reader),
        }
    }

    /// The fan-out engine, shared with the event consumer.
    #[must_use]
    pub fn engine(&self) -> &Arc<FanoutEngine<S>> {
        &self.engine
    }

    /// The read path.
    #[must_use]
    pub fn reader(&self) -> &FeedReader<S> {
        &self.reader
    }

    /// Read one page. An empty `user_id` reads every timeline.
    ///
    /// # Errors
    ///
    /// See [`FeedReader::get_feed`].
    pub async fn get_feed(&self, req: GetFeedRequest) -> Result<GetFeedResponse, FeedError> {
        let user = req
            .user_id
            .filter(|id| !id.trim().is_empty())
            .map(UserId::new);

        let page = self
            .reader
            .get_feed(user.as_ref(), req.limit, req.cursor.as_deref())
            .await?;

        let has_more = page.has_more();
        Ok(GetFeedResponse {
            entries: page.entries.into_iter().map(FeedEntry::from).collect(),
            has_more,
            next_cursor: page.next_cursor,
        })
    }

    /// Fan a post by the caller out in the background.
    ///
    /// Returns once the fan-out is scheduled. The handle resolves to its
    /// outcome, which is also logged.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidArgument`] if the caller or the post id is
    /// empty.
    pub fn add_post(
        &self,
        ctx: &RequestContext,
        post: NewPost,
    ) -> Result<JoinHandle<Result<FanoutReport, FanoutError>>, FeedError> {
        if ctx.caller().is_empty() {
            return Err(FeedError::InvalidArgument("caller is not authenticated".into()));
        }
        if post.post_id.is_empty() {
            return Err(FeedError::InvalidArgument("post_id is required".into()));
        }

        let created_at = post.created_at.unwrap_or_else(now_millis);
        let author = ctx.caller().clone();
        let engine = Arc::clone(&self.engine);

        debug!(author = %author, post = %post.post_id, "Scheduling fan-out");
        Ok(tokio::spawn(async move {
            let result = engine.fanout(&author, &post.post_id, created_at).await;
            if let Err(e) = &result {
                warn!(author = %author, post = %post.post_id, error = %e, "Synchronous fan-out failed");
            }
            result
        }))
    }
}

/// Current time at millisecond precision, matching what storage keeps.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FollowEdge;
    use crate::sqlite::SqliteTimelineStore;

    async fn service() -> FeedService<SqliteTimelineStore> {
        let store = SqliteTimelineStore::in_memory().unwrap();
        store
            .insert_follows(vec![FollowEdge::new("U1", "A"), FollowEdge::new("U2", "A")])
            .await
            .unwrap();
        FeedService::new(Arc::new(store), ReaderConfig::default(), 100)
    }

    #[tokio::test]
    async fn test_add_post_fans_out_as_caller() {
        let service = service().await;
        let ctx = RequestContext::new("A");
        let post = NewPost {
            created_at: DateTime::from_timestamp_millis(1000),
            ..NewPost::new("p1")
        };

        let report = service.add_post(&ctx, post).unwrap().await.unwrap().unwrap();
        assert_eq!(report.inserted, 2);

        let page = service
            .get_feed(GetFeedRequest {
                user_id: Some("U1".into()),
                ..GetFeedRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(
            page.entries,
            vec![FeedEntry {
                user_id: "U1".into(),
                post_id: "p1".into(),
                created_at_ms: 1000,
            }]
        );
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_add_post_replay_is_idempotent() {
        let service = service().await;
        let ctx = RequestContext::new("A");

        let first = service.add_post(&ctx, NewPost::new("p1")).unwrap().await.unwrap().unwrap();
        let second = service.add_post(&ctx, NewPost::new("p1")).unwrap().await.unwrap().unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
    }

    #[tokio::test]
    async fn test_add_post_requires_caller_and_post() {
        let service = service().await;

        assert!(matches!(
            service.add_post(&RequestContext::new(""), NewPost::new("p1")),
            Err(FeedError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.add_post(&RequestContext::new("A"), NewPost::new("")),
            Err(FeedError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_user_reads_global_feed() {
        let service = service().await;
        service
            .add_post(&RequestContext::new("A"), NewPost::new("p1"))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let page = service
            .get_feed(GetFeedRequest {
                user_id: Some(String::new()),
                limit: Some(1),
                cursor: None,
            })
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.has_more);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn test_get_feed_rejects_bad_cursor() {
        let service = service().await;
        let result = service
            .get_feed(GetFeedRequest {
                cursor: Some("not-base64!!".into()),
                ..GetFeedRequest::default()
            })
            .await;
        assert!(matches!(result, Err(FeedError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_post_from_request() {
        let req: AddPostRequest =
            serde_json::from_str(r#"{"post_id":"p1","media_ref":"m/1","created_at_ms":5}"#).unwrap();
        let post = NewPost::try_from(req).unwrap();
        assert_eq!(post.post_id, PostId::new("p1"));
        assert_eq!(post.media_ref.as_deref(), Some("m/1"));
        assert_eq!(post.created_at.map(|t| t.timestamp_millis()), Some(5));

        let bad = AddPostRequest {
            created_at_ms: Some(i64::MAX),
            ..serde_json::from_str(r#"{"post_id":"p1"}"#).unwrap()
        };
        assert!(NewPost::try_from(bad).is_err());
    }
}
