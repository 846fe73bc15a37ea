//! In-process notification queue.
//!
//! Used when no message bus is configured, and by tests and benchmarks.
//! Unsettled deliveries go back to the end of the queue with their delivery
//! count bumped; redelivery delays are not simulated.

use async_trait::async_trait;
use bytes::Bytes;
use feed_protocol::{EventError, PostCreated, KEY_HEADER, POST_CREATED_VERSION, SCHEMA_HEADER};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::traits::{DeadLetter, DeadLetterSink, Delivery, NotificationSource, SourceError};

#[derive(Debug, Clone)]
struct Queued {
    headers: Vec<(String, String)>,
    payload: Bytes,
    delivered: u64,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<Queued>>,
    notify: Notify,
    closed: AtomicBool,
    acked: AtomicU64,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, message: Queued) {
        self.queue().push_back(message);
        self.notify.notify_one();
    }
}

/// Publishing handle of an in-process queue.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw message.
    pub fn publish(&self, headers: Vec<(String, String)>, payload: impl Into<Bytes>) {
        self.shared.push(Queued {
            headers,
            payload: payload.into(),
            delivered: 0,
        });
    }

    /// Enqueue a post-created notification keyed by its post id.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn publish_event(&self, event: &PostCreated) -> Result<(), EventError> {
        let headers = vec![
            (SCHEMA_HEADER.to_string(), POST_CREATED_VERSION.to_string()),
            (KEY_HEADER.to_string(), event.post_id.clone()),
        ];
        self.publish(headers, event.encode()?);
        Ok(())
    }

    /// Stop accepting polls once the queue drains.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue().len()
    }

    /// Check whether no message is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages acknowledged so far.
    #[must_use]
    pub fn acked(&self) -> u64 {
        self.shared.acked.load(Ordering::SeqCst)
    }

    /// A consuming end of this queue.
    #[must_use]
    pub fn source(&self) -> MemorySource {
        MemorySource {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consuming end of a [`MemoryQueue`].
pub struct MemorySource {
    shared: Arc<Shared>,
}

#[async_trait]
impl NotificationSource for MemorySource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, SourceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();

            let next = self.shared.queue().pop_front();
            if let Some(mut message) = next {
                message.delivered += 1;
                return Ok(Some(Box::new(MemoryDelivery {
                    shared: Arc::clone(&self.shared),
                    message: Some(message),
                })));
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(SourceError::Closed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A message taken off a [`MemoryQueue`].
struct MemoryDelivery {
    shared: Arc<Shared>,
    /// `None` once settled.
    message: Option<Queued>,
}

impl MemoryDelivery {
    fn message(&self) -> Option<&Queued> {
        self.message.as_ref()
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        self.message()
            .map(|m| m.payload.as_ref())
            .unwrap_or_default()
    }

    fn key(&self) -> Option<&str> {
        self.header(KEY_HEADER)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.message()?
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn delivery_count(&self) -> u64 {
        self.message().map_or(0, |m| m.delivered)
    }

    async fn ack(&mut self) -> Result<(), SourceError> {
        if self.message.take().is_some() {
            self.shared.acked.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn nack(&mut self, _delay: Duration) -> Result<(), SourceError> {
        if let Some(message) = self.message.take() {
            self.shared.push(message);
        }
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.shared.push(message);
        }
    }
}

/// Dead-letter sink that keeps letters in memory.
#[derive(Clone, Default)]
pub struct MemoryDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the letters received.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every following send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn send(&self, letter: DeadLetter) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::DeadLetter("sink unavailable".into()));
        }
        self.letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(letter);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
