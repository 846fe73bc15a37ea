//! Identifiers and rows of the timeline domain.

use chrono::{DateTime, Utc};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Check whether the identifier is blank.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a user (timeline owner, follower or author).
    UserId
);

string_id!(
    /// Identifier of a post.
    PostId
);

/// A follow relation, owned by the identity domain and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FollowEdge {
    /// The user who follows.
    pub follower_id: UserId,
    /// The user being followed.
    pub followee_id: UserId,
}

impl FollowEdge {
    /// Create a new edge.
    #[must_use]
    pub fn new(follower_id: impl Into<UserId>, followee_id: impl Into<UserId>) -> Self {
        Self {
            follower_id: follower_id.into(),
            followee_id: followee_id.into(),
        }
    }
}

/// "Post `post_id` appears in `user_id`'s timeline, surfaced at `created_at`."
///
/// At most one entry exists per `(user_id, post_id)`. Entries are never updated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimelineEntry {
    /// Timeline owner.
    pub user_id: UserId,
    /// Referenced post.
    pub post_id: PostId,
    /// Surfacing time, millisecond precision.
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, post_id: impl Into<PostId>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            post_id: post_id.into(),
            created_at,
        }
    }

    /// Surfacing time in Unix milliseconds.
    #[must_use]
    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}
