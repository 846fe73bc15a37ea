//! Request and response bodies of the request-facing surface.

use serde::{Deserialize, Serialize};

/// Query of a timeline page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFeedRequest {
    /// Timeline owner. Absent or empty reads the global timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Requested page size; clamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Continuation token from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// One timeline pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Timeline owner.
    pub user_id: String,
    /// Referenced post.
    pub post_id: String,
    /// Surfacing time in Unix milliseconds.
    pub created_at_ms: i64,
}

/// A page of a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFeedResponse {
    /// Entries, newest first.
    pub entries: Vec<FeedEntry>,
    /// Whether a continuation cursor was issued.
    pub has_more: bool,
    /// Token for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Synchronous post-created trigger. The author comes from the caller context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPostRequest {
    /// Identifier of the new post.
    pub post_id: String,
    #[serde(default)]
    pub caption: String,
    /// Fully resolved media identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Creation time; the server clock is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
}
