//! The fan-out consumer loop.
//!
//! One loop per process, strictly sequential:
//!
//! ```text
//! Polling ──▶ Decoding ──▶ FanningOut ──▶ Acknowledging ──▶ Polling
//!    │
//!    └──▶ Stopped   (cancelled at a poll boundary, or fatal source error)
//! ```
//!
//! A delivery is acknowledged only after its fan-out committed. Messages that
//! cannot be applied (bad payload, unknown schema, missing ids) are released
//! for redelivery until they have been attempted `max_attempts` times; they
//! are then handed to the dead-letter sink and acknowledged so they no longer
//! block the stream. Storage failures do not spend that budget: the message is
//! released with a growing delay until the store recovers.

use chrono::{DateTime, Utc};
use feed_core::metrics;
use feed_core::{FanoutEngine, FanoutError, FanoutReport, PostId, TimelineStore, UserId};
use feed_protocol::{EventError, PostCreated, SCHEMA_HEADER};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::traits::{DeadLetter, DeadLetterSink, Delivery, NotificationSource, SourceError};

/// Attempt counters kept before the table is reset.
const MAX_TRACKED_KEYS: usize = 10_000;

/// Consumer errors.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The source failed in a way the loop cannot recover from.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Waiting for the next delivery.
    Polling,
    /// Parsing a delivery's payload and headers.
    Decoding,
    /// Writing timeline entries.
    FanningOut,
    /// Settling the delivery with the source.
    Acknowledging,
    /// The loop has exited.
    Stopped,
}

/// Consumer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Upper bound on one poll, and so on cancellation latency.
    pub poll_timeout: Duration,
    /// Attempts before a message is dead-lettered.
    pub max_attempts: u64,
    /// Delay requested when releasing a failed message, and the first step
    /// of the storage backoff.
    pub redelivery_delay: Duration,
    /// Upper bound of the storage backoff.
    pub max_redelivery_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(250),
            max_attempts: 5,
            redelivery_delay: Duration::from_secs(1),
            max_redelivery_delay: Duration::from_secs(30),
        }
    }
}

impl ConsumerConfig {
    /// Delay before redelivering a message whose fan-out hit a storage
    /// failure, doubling with each delivery up to `max_redelivery_delay`.
    #[must_use]
    pub fn storage_backoff(&self, deliveries: u64) -> Duration {
        let exponent = u32::try_from(deliveries.saturating_sub(1).min(16)).unwrap_or(16);
        self.redelivery_delay
            .saturating_mul(1 << exponent)
            .min(self.max_redelivery_delay)
    }
}

/// Why a delivery was not applied.
enum Failure {
    /// The message itself is unusable; counts toward `max_attempts`.
    Poison(String),
    /// The store is unavailable; retried until it recovers.
    Storage(String),
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages fanned out and acknowledged.
    pub applied: u64,
    /// Failed attempts released for redelivery.
    pub retried: u64,
    /// Messages given up on.
    pub dead_lettered: u64,
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fanned out and acknowledged.
    Applied(FanoutReport),
    /// Failed and released for redelivery.
    Retrying { attempts: u64, reason: String },
    /// Failed for the last time, dead-lettered and acknowledged.
    DeadLettered { attempts: u64, reason: String },
    /// Work is done or given up on, but the acknowledgement failed; the
    /// message will come back.
    Unacknowledged { reason: String },
}

/// Drives the fan-out engine from a notification source.
pub struct EventConsumer<S> {
    source: Box<dyn NotificationSource>,
    engine: Arc<FanoutEngine<S>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ConsumerConfig,
    attempts: HashMap<String, u64>,
    stats: ConsumerStats,
    state: watch::Sender<ConsumerState>,
}

impl<S: TimelineStore> EventConsumer<S> {
    /// Create a consumer.
    #[must_use]
    pub fn new(
        source: Box<dyn NotificationSource>,
        engine: Arc<FanoutEngine<S>>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Polling);
        Self {
            source,
            engine,
            dead_letters,
            config,
            attempts: HashMap::new(),
            stats: ConsumerStats::default(),
            state,
        }
    }

    /// Watch the loop state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Run until `cancel` fires or the source fails fatally.
    ///
    /// Cancellation is observed between polls; an in-flight fan-out always
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is lost.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ConsumerStats, ConsumerError> {
        info!(
            source = self.source.name(),
            dead_letters = self.dead_letters.name(),
            max_attempts = self.config.max_attempts,
            "Event consumer started"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.poll_once().await {
                self.state.send_replace(ConsumerState::Stopped);
                error!(error = %e, stats = ?self.stats, "Event consumer stopped on source failure");
                return Err(e);
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
        info!(stats = ?self.stats, "Event consumer stopped");
        Ok(self.stats)
    }

    /// Run one poll cycle.
    ///
    /// Returns `Ok(None)` when nothing was received.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal source failures.
    pub async fn poll_once(&mut self) -> Result<Option<Outcome>, ConsumerError> {
        self.state.send_replace(ConsumerState::Polling);

        let delivery = match self.source.poll(self.config.poll_timeout).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return Ok(None),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Transient poll failure");
                return Ok(None);
            }
        };

        Ok(Some(self.handle(delivery).await))
    }

    async fn handle(&mut self, mut delivery: Box<dyn Delivery>) -> Outcome {
        self.state.send_replace(ConsumerState::Decoding);
        let key = attempt_key(delivery.as_ref());

        let decoded = decode(delivery.as_ref());
        let result = match decoded {
            Err(e) => {
                warn!(key = %key, error = %e, "Bad post-created payload");
                Err(Failure::Poison(format!("decode: {e}")))
            }
            Ok((author, post, created_at)) => {
                self.state.send_replace(ConsumerState::FanningOut);
                self.engine
                    .fanout(&author, &post, created_at)
                    .await
                    .map_err(|e| match e {
                        FanoutError::Invalid(_) => Failure::Poison(format!("fanout: {e}")),
                        FanoutError::Storage(_) => Failure::Storage(format!("fanout: {e}")),
                    })
            }
        };

        self.state.send_replace(ConsumerState::Acknowledging);
        match result {
            Ok(report) => {
                self.attempts.remove(&key);
                if let Err(e) = delivery.ack().await {
                    warn!(key = %key, error = %e, "Acknowledgement failed, message will be redelivered");
                    metrics::record_event("unacknowledged");
                    return Outcome::Unacknowledged {
                        reason: e.to_string(),
                    };
                }
                self.stats.applied += 1;
                metrics::record_event("applied");
                debug!(key = %key, inserted = report.inserted, "Applied post-created event");
                Outcome::Applied(report)
            }
            Err(Failure::Poison(reason)) => self.fail(delivery, key, reason).await,
            Err(Failure::Storage(reason)) => self.release(delivery, key, reason).await,
        }
    }

    /// Release a message that failed on storage without spending its attempts.
    async fn release(&mut self, mut delivery: Box<dyn Delivery>, key: String, reason: String) -> Outcome {
        let deliveries = delivery.delivery_count();
        let delay = self.config.storage_backoff(deliveries);

        self.stats.retried += 1;
        metrics::record_event("retried");
        warn!(key = %key, deliveries, delay = ?delay, reason = %reason, "Store unavailable, releasing message");
        if let Err(e) = delivery.nack(delay).await {
            warn!(key = %key, error = %e, "Negative acknowledgement failed");
        }
        Outcome::Retrying {
            attempts: deliveries,
            reason,
        }
    }

    async fn fail(&mut self, mut delivery: Box<dyn Delivery>, key: String, reason: String) -> Outcome {
        if self.attempts.len() >= MAX_TRACKED_KEYS && !self.attempts.contains_key(&key) {
            self.attempts.clear();
        }
        let counter = self.attempts.entry(key.clone()).or_insert(0);
        *counter += 1;
        let attempts = (*counter).max(delivery.delivery_count());

        if attempts < self.config.max_attempts {
            self.stats.retried += 1;
            metrics::record_event("retried");
            warn!(key = %key, attempts, reason = %reason, "Releasing message for redelivery");
            if let Err(e) = delivery.nack(self.config.redelivery_delay).await {
                warn!(key = %key, error = %e, "Negative acknowledgement failed");
            }
            return Outcome::Retrying { attempts, reason };
        }

        let letter = DeadLetter {
            key: delivery.key().map(str::to_string),
            schema: delivery.header(SCHEMA_HEADER).map(str::to_string),
            payload: delivery.payload().to_vec(),
            reason: reason.clone(),
            attempts,
        };
        if let Err(e) = self.dead_letters.send(letter).await {
            error!(key = %key, attempts, error = %e, "Dead-letter write failed, keeping message");
            metrics::record_event("unacknowledged");
            if let Err(e) = delivery.nack(self.config.redelivery_delay).await {
                warn!(key = %key, error = %e, "Negative acknowledgement failed");
            }
            return Outcome::Unacknowledged {
                reason: e.to_string(),
            };
        }

        self.attempts.remove(&key);
        metrics::record_dead_letter();
        if let Err(e) = delivery.ack().await {
            warn!(key = %key, error = %e, "Acknowledgement of dead letter failed");
            metrics::record_event("unacknowledged");
            return Outcome::Unacknowledged {
                reason: e.to_string(),
            };
        }

        self.stats.dead_lettered += 1;
        metrics::record_event("dead_lettered");
        error!(key = %key, attempts, reason = %reason, "Message dead-lettered");
        Outcome::DeadLettered { attempts, reason }
    }
}

fn decode(delivery: &dyn Delivery) -> Result<(UserId, PostId, DateTime<Utc>), EventError> {
    let event = PostCreated::decode(delivery.payload(), delivery.header(SCHEMA_HEADER))?;
    let created_at = event.created_at()?;
    Ok((
        UserId::new(event.author_id),
        PostId::new(event.post_id),
        created_at,
    ))
}

/// Key used for attempt accounting: the message key, or a payload digest for
/// unkeyed messages.
fn attempt_key(delivery: &dyn Delivery) -> String {
    match delivery.key() {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            let mut hasher = DefaultHasher::new();
            delivery.payload().hash(&mut hasher);
            format!("payload:{:016x}", hasher.finish())
        }
    }
}
