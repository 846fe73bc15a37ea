//! Cursor codec for paginated timeline reads.
//!
//! A cursor is base64url (no padding) over short ASCII text:
//!
//! - `o:<offset>` - skip `offset` rows of the descending scan
//! - `k:<created_at_ms>:<post_id length>:<post_id>:<user_id>` - resume strictly
//!   after the given row
//!
//! Decoding only accepts tokens that [`encode`] could have produced. Anything
//! else (bad alphabet, padding, leading zeros, signs, trailing bytes) is an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

/// Maximum accepted token length in bytes.
pub const MAX_CURSOR_LENGTH: usize = 1024;

const OFFSET_TAG: &str = "o:";
const KEYSET_TAG: &str = "k:";

/// Errors produced when decoding a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// Token exceeds [`MAX_CURSOR_LENGTH`].
    #[error("Cursor length {0} exceeds maximum {MAX_CURSOR_LENGTH}")]
    TooLong(usize),

    /// Token is not unpadded base64url.
    #[error("Cursor is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Decoded bytes are not UTF-8.
    #[error("Cursor is not valid UTF-8")]
    Utf8,

    /// Decoded text does not describe a position.
    #[error("Malformed cursor: {0}")]
    Malformed(&'static str),
}

/// Resume point of a keyset scan.
///
/// Rows sort by `(created_at, post_id, user_id)` descending; the next page
/// starts at the first row strictly below this tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeysetPosition {
    /// Creation time of the last row served, in Unix milliseconds.
    pub created_at_ms: i64,
    /// Post of the last row served.
    pub post_id: String,
    /// Owner of the last row served.
    pub user_id: String,
}

/// A decoded pagination position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Number of rows already consumed.
    Offset(u64),
    /// Last row already consumed.
    Keyset(KeysetPosition),
}

impl Cursor {
    /// Render the plain (pre-base64) text of this cursor.
    fn render(&self) -> String {
        match self {
            Cursor::Offset(offset) => format!("{OFFSET_TAG}{offset}"),
            Cursor::Keyset(pos) => format!(
                "{KEYSET_TAG}{}:{}:{}:{}",
                pos.created_at_ms,
                pos.post_id.len(),
                pos.post_id,
                pos.user_id
            ),
        }
    }

    fn parse(text: &str) -> Result<Self, CursorError> {
        if let Some(rest) = text.strip_prefix(OFFSET_TAG) {
            let offset = rest
                .parse::<u64>()
                .map_err(|_| CursorError::Malformed("offset is not a non-negative integer"))?;
            return Ok(Cursor::Offset(offset));
        }

        if let Some(rest) = text.strip_prefix(KEYSET_TAG) {
            let (ms, rest) = rest
                .split_once(':')
                .ok_or(CursorError::Malformed("keyset cursor is truncated"))?;
            let created_at_ms = ms
                .parse::<i64>()
                .map_err(|_| CursorError::Malformed("keyset timestamp is not an integer"))?;

            let (len, rest) = rest
                .split_once(':')
                .ok_or(CursorError::Malformed("keyset cursor is truncated"))?;
            let len = len
                .parse::<usize>()
                .map_err(|_| CursorError::Malformed("keyset length is not an integer"))?;

            let post_id = rest
                .get(..len)
                .ok_or(CursorError::Malformed("keyset post id is truncated"))?;
            let user_id = rest[len..]
                .strip_prefix(':')
                .ok_or(CursorError::Malformed("keyset separator missing"))?;

            if post_id.is_empty() || user_id.is_empty() {
                return Err(CursorError::Malformed("keyset ids must not be empty"));
            }

            return Ok(Cursor::Keyset(KeysetPosition {
                created_at_ms,
                post_id: post_id.to_string(),
                user_id: user_id.to_string(),
            }));
        }

        Err(CursorError::Malformed("unknown cursor kind"))
    }
}

/// Encode a cursor to an opaque token.
#[must_use]
pub fn encode(cursor: &Cursor) -> String {
    URL_SAFE_NO_PAD.encode(cursor.render())
}

/// Decode an opaque token.
///
/// # Errors
///
/// Returns an error for any token not produced by [`encode`].
pub fn decode(token: &str) -> Result<Cursor, CursorError> {
    if token.len() > MAX_CURSOR_LENGTH {
        return Err(CursorError::TooLong(token.len()));
    }

    let bytes = URL_SAFE_NO_PAD.decode(token)?;
    let text = std::str::from_utf8(&bytes).map_err(|_| CursorError::Utf8)?;
    let cursor = Cursor::parse(text)?;

    // Rejects "o:007", "o:+7", "k:-0:..." and other aliases of a valid position.
    if cursor.render() != text {
        return Err(CursorError::Malformed("non-canonical cursor"));
    }

    Ok(cursor)
}

/// Encode an offset position.
#[must_use]
pub fn encode_offset(offset: u64) -> String {
    encode(&Cursor::Offset(offset))
}

/// Decode a token that must hold an offset position.
///
/// # Errors
///
/// Returns an error if the token is invalid or holds a keyset position.
pub fn decode_offset(token: &str) -> Result<u64, CursorError> {
    match decode(token)? {
        Cursor::Offset(offset) => Ok(offset),
        Cursor::Keyset(_) => Err(CursorError::Malformed("expected an offset cursor")),
    }
}

/// Codec handle for callers that prefer a value over free functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorCodec;

impl CursorCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encode a cursor to an opaque token.
    #[must_use]
    pub fn encode(&self, cursor: &Cursor) -> String {
        encode(cursor)
    }

    /// Decode an opaque token.
    ///
    /// # Errors
    ///
    /// Returns an error for any token not produced by [`CursorCodec::encode`].
    pub fn decode(&self, token: &str) -> Result<Cursor, CursorError> {
        decode(token)
    }
}
