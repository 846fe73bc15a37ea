//! The inbound "post created" notification.
//!
//! Payloads are JSON:
//!
//! ```json
//! { "post_id": "p1", "author_id": "a1", "caption": "", "media_path": "",
//!   "mime": "", "created_at_ms": 1000 }
//! ```
//!
//! Messages are keyed by `post_id` and carry a [`SCHEMA_HEADER`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{SchemaVersion, POST_CREATED_VERSION};

/// Header naming the payload schema.
pub const SCHEMA_HEADER: &str = "schema";

/// Header carrying the message key where the bus has no native key.
pub const KEY_HEADER: &str = "key";

/// Content type of encoded payloads.
pub const CONTENT_TYPE: &str = "application/json";

/// Errors decoding a notification.
#[derive(Debug, Error)]
pub enum EventError {
    /// Payload is not the expected JSON shape.
    #[error("Invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required identifier is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Schema header names an unknown or incompatible schema.
    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),

    /// Timestamp does not fit a calendar date.
    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// A post-created notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCreated {
    /// Identifier of the new post.
    #[serde(default)]
    pub post_id: String,
    /// Author whose followers receive the post.
    #[serde(default)]
    pub author_id: String,
    /// Caption text.
    #[serde(default)]
    pub caption: String,
    /// Media reference, opaque to this crate.
    #[serde(default)]
    pub media_path: String,
    /// Media type of the referenced object.
    #[serde(default)]
    pub mime: String,
    /// Creation time in Unix milliseconds.
    pub created_at_ms: i64,
}

impl PostCreated {
    /// Create a notification with empty caption and media.
    #[must_use]
    pub fn new(post_id: impl Into<String>, author_id: impl Into<String>, created_at_ms: i64) -> Self {
        Self {
            post_id: post_id.into(),
            author_id: author_id.into(),
            caption: String::new(),
            media_path: String::new(),
            mime: String::new(),
            created_at_ms,
        }
    }

    /// Creation time as a UTC timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if `created_at_ms` is out of the representable range.
    pub fn created_at(&self) -> Result<DateTime<Utc>, EventError> {
        DateTime::from_timestamp_millis(self.created_at_ms)
            .ok_or(EventError::InvalidTimestamp(self.created_at_ms))
    }

    /// Encode to a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a payload.
    ///
    /// `schema` is the value of the [`SCHEMA_HEADER`], if the message had one.
    /// A missing header is read as the current version.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is incompatible, the JSON is malformed,
    /// an identifier is empty, or the timestamp is out of range.
    pub fn decode(payload: &[u8], schema: Option<&str>) -> Result<Self, EventError> {
        if let Some(header) = schema {
            match SchemaVersion::parse(header) {
                Some(v) if v.is_compatible_with(&POST_CREATED_VERSION) => {}
                _ => return Err(EventError::UnsupportedSchema(header.to_string())),
            }
        }

        let event: PostCreated = serde_json::from_slice(payload)?;

        if event.post_id.trim().is_empty() {
            return Err(EventError::MissingField("post_id"));
        }
        if event.author_id.trim().is_empty() {
            return Err(EventError::MissingField("author_id"));
        }
        event.created_at()?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_payload() {
        let payload = br#"{"post_id":"p1","author_id":"A","caption":"hi",
            "media_path":"media/abc/file.jpg","mime":"image/jpeg","created_at_ms":1000}"#;

        let event = PostCreated::decode(payload, Some("content.post.created.v1")).unwrap();
        assert_eq!(event.post_id, "p1");
        assert_eq!(event.author_id, "A");
        assert_eq!(event.media_path, "media/abc/file.jpg");
        assert_eq!(event.created_at().unwrap().timestamp_millis(), 1000);
    }

    #[test]
    fn test_decode_without_header_or_optional_fields() {
        let payload = br#"{"post_id":"p1","author_id":"A","created_at_ms":5}"#;
        let event = PostCreated::decode(payload, None).unwrap();
        assert_eq!(event, PostCreated::new("p1", "A", 5));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        assert!(matches!(
            PostCreated::decode(b"{not json", None),
            Err(EventError::Json(_))
        ));
        assert!(matches!(
            PostCreated::decode(br#"{"post_id":"p1","author_id":"A"}"#, None),
            Err(EventError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_ids() {
        let payload = br#"{"post_id":"p1","created_at_ms":5}"#;
        assert!(matches!(
            PostCreated::decode(payload, None),
            Err(EventError::MissingField("author_id"))
        ));

        let payload = br#"{"post_id":" ","author_id":"A","created_at_ms":5}"#;
        assert!(matches!(
            PostCreated::decode(payload, None),
            Err(EventError::MissingField("post_id"))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_schema() {
        let payload = PostCreated::new("p1", "A", 1).encode().unwrap();
        assert!(matches!(
            PostCreated::decode(&payload, Some("content.post.created.v2")),
            Err(EventError::UnsupportedSchema(_))
        ));
        assert!(matches!(
            PostCreated::decode(&payload, Some("garbage")),
            Err(EventError::UnsupportedSchema(_))
        ));
    }

    #[test]
    fn test_decode_rejects_out_of_range_timestamp() {
        let payload = PostCreated::new("p1", "A", i64::MAX).encode().unwrap();
        assert!(matches!(
            PostCreated::decode(&payload, None),
            Err(EventError::InvalidTimestamp(_))
        ));
    }
}
