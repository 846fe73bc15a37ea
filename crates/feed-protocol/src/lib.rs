//! # feed-protocol
//!
//! Wire formats for the feed fan-out engine.
//!
//! This crate defines everything that crosses a process boundary:
//!
//! - `Cursor` - Opaque, resumable pagination tokens
//! - `PostCreated` - The inbound "post created" notification
//! - `SchemaVersion` - Payload schema negotiation via message headers
//! - `api` - Request/response bodies of the request-facing surface
//!
//! ## Example
//!
//! ```rust
//! use feed_protocol::cursor;
//!
//! let token = cursor::encode_offset(40);
//! assert_eq!(cursor::decode_offset(&token).unwrap(), 40);
//! assert!(cursor::decode_offset("not-base64!!").is_err());
//! ```

pub mod api;
pub mod cursor;
pub mod event;
pub mod version;

pub use cursor::{Cursor, CursorCodec, CursorError, KeysetPosition};
pub use event::{EventError, PostCreated, KEY_HEADER, SCHEMA_HEADER};
pub use version::{SchemaVersion, POST_CREATED_VERSION};
