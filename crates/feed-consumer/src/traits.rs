//! Source abstraction traits for inbound notifications.
//!
//! Every stream the consumer can read from implements [`NotificationSource`],
//! handing out [`Delivery`] values that are settled with an explicit
//! acknowledgement or a negative acknowledgement.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection to the stream is gone and will not come back.
    #[error("Source disconnected: {0}")]
    Disconnected(String),

    /// The stream ended.
    #[error("Source closed")]
    Closed,

    /// A receive failed but the stream is still usable.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Settling a delivery failed.
    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    /// Forwarding to a dead-letter sink failed.
    #[error("Dead-letter publish failed: {0}")]
    DeadLetter(String),
}

impl SourceError {
    /// Whether the consumer loop must stop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Disconnected(_) | SourceError::Closed)
    }
}

/// One received notification, not yet settled.
///
/// Dropping a delivery without settling it leaves it to the source's
/// redelivery policy.
#[async_trait]
pub trait Delivery: Send {
    /// Raw payload.
    fn payload(&self) -> &[u8];

    /// Partition key (the post id for post-created notifications).
    fn key(&self) -> Option<&str>;

    /// Value of a message header.
    fn header(&self, name: &str) -> Option<&str>;

    /// How many times this message has been delivered, starting at 1.
    fn delivery_count(&self) -> u64;

    /// Commit the message; it will not be delivered again.
    async fn ack(&mut self) -> Result<(), SourceError>;

    /// Release the message for redelivery after `delay`.
    async fn nack(&mut self, delay: Duration) -> Result<(), SourceError>;
}

/// A stream of notifications.
#[async_trait]
pub trait NotificationSource: Send {
    /// Wait up to `timeout` for the next delivery.
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, SourceError>;

    /// Get the source name (e.g., "memory", "jetstream").
    fn name(&self) -> &'static str;
}

/// A notification given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Partition key of the original message.
    pub key: Option<String>,
    /// Schema header of the original message.
    pub schema: Option<String>,
    /// Original payload, untouched.
    pub payload: Vec<u8>,
    /// Last failure.
    pub reason: String,
    /// Attempts made before giving up.
    pub attempts: u64,
}

/// Destination for notifications that exhausted their attempts.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Store a dead letter durably.
    async fn send(&self, letter: DeadLetter) -> Result<(), SourceError>;

    /// Get the sink name.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(SourceError::Closed.is_fatal());
        assert!(SourceError::Disconnected("reset".into()).is_fatal());
        assert!(!SourceError::Receive("missing heartbeat".into()).is_fatal());
        assert!(!SourceError::Ack("timeout".into()).is_fatal());
    }
}
