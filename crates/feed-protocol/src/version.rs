//! Payload schema versioning.
//!
//! Producers tag each notification with a `schema` header such as
//! `content.post.created.v1`. Consumers accept any payload whose major version
//! matches their own.

use std::fmt;

/// Schema family of post-created notifications.
pub const POST_CREATED_FAMILY: &str = "content.post.created";

/// Schema version understood by this crate.
pub const POST_CREATED_VERSION: SchemaVersion = SchemaVersion { major: 1 };

/// Version of the post-created payload schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaVersion {
    /// Major version - breaking payload changes increment this.
    pub major: u32,
}

impl SchemaVersion {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u32) -> Self {
        Self { major }
    }

    /// Parse a header value like `content.post.created.v1`.
    ///
    /// Returns `None` for other families or malformed versions.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let digits = header
            .strip_prefix(POST_CREATED_FAMILY)?
            .strip_prefix(".v")?;
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        digits.parse().ok().map(Self::new)
    }

    /// Check if payloads of this version can be read by `other`.
    #[must_use]
    pub fn is_compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", POST_CREATED_FAMILY, self.major)
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        POST_CREATED_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            SchemaVersion::parse("content.post.created.v1"),
            Some(SchemaVersion::new(1))
        );
        assert_eq!(
            SchemaVersion::parse("content.post.created.v12"),
            Some(SchemaVersion::new(12))
        );
        assert_eq!(SchemaVersion::parse("content.post.created.v"), None);
        assert_eq!(SchemaVersion::parse("content.post.created.v01"), None);
        assert_eq!(SchemaVersion::parse("content.post.deleted.v1"), None);
        assert_eq!(SchemaVersion::parse("v1"), None);
    }

    #[test]
    fn test_version_compatibility() {
        let v1 = SchemaVersion::new(1);
        let v2 = SchemaVersion::new(2);

        assert!(v1.is_compatible_with(&POST_CREATED_VERSION));
        assert!(!v2.is_compatible_with(&POST_CREATED_VERSION));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(POST_CREATED_VERSION.to_string(), "content.post.created.v1");
    }
}
