//! NATS JetStream notification source.
//!
//! Reads a durable pull consumer with explicit acknowledgement. Failed
//! deliveries are released with a delayed negative acknowledgement so the
//! server redelivers them; the server-side delivery count feeds the consumer's
//! attempt accounting.

use async_nats::jetstream::consumer::pull::{self, MessagesErrorKind};
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use feed_protocol::{KEY_HEADER, SCHEMA_HEADER};
use futures_util::StreamExt;
use std::time::Duration;
use tracing::info;

use crate::traits::{DeadLetter, DeadLetterSink, Delivery, NotificationSource, SourceError};

/// Header carrying the dead-letter reason.
pub const REASON_HEADER: &str = "x-dead-letter-reason";

/// Header carrying the attempt count of a dead letter.
pub const ATTEMPTS_HEADER: &str = "x-dead-letter-attempts";

/// Where to read notifications from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JetStreamConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name. Created on first use if missing.
    pub stream: String,
    /// Subject the stream captures.
    pub subject: String,
    /// Durable consumer name shared by every instance of the service.
    pub durable_name: String,
}

/// Pull-consumer source.
pub struct JetStreamSource {
    messages: pull::Stream,
}

impl JetStreamSource {
    /// Connect and bind the durable consumer.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Disconnected`] if the server, the stream or the
    /// consumer cannot be reached.
    pub async fn connect(config: &JetStreamConfig) -> Result<Self, SourceError> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| SourceError::Disconnected(format!("connect: {e}")))?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| SourceError::Disconnected(format!("stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SourceError::Disconnected(format!("consumer: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| SourceError::Disconnected(format!("messages: {e}")))?;

        info!(
            url = %config.url,
            stream = %config.stream,
            consumer = %config.durable_name,
            "Bound JetStream consumer"
        );
        Ok(Self { messages })
    }
}

#[async_trait]
impl NotificationSource for JetStreamSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, SourceError> {
        match tokio::time::timeout(timeout, self.messages.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(SourceError::Closed),
            Ok(Some(Ok(message))) => Ok(Some(Box::new(JetStreamDelivery { message }))),
            Ok(Some(Err(e))) if matches!(e.kind(), MessagesErrorKind::MissingHeartbeat) => {
                Err(SourceError::Receive(e.to_string()))
            }
            Ok(Some(Err(e))) => Err(SourceError::Disconnected(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "jetstream"
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        self.message.payload.as_ref()
    }

    fn key(&self) -> Option<&str> {
        self.header(KEY_HEADER)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.message
            .headers
            .as_ref()?
            .get(name)
            .map(|value| value.as_str())
    }

    fn delivery_count(&self) -> u64 {
        self.message
            .info()
            .ok()
            .and_then(|info| u64::try_from(info.delivered).ok())
            .unwrap_or(1)
    }

    async fn ack(&mut self) -> Result<(), SourceError> {
        self.message
            .ack()
            .await
            .map_err(|e| SourceError::Ack(e.to_string()))
    }

    async fn nack(&mut self, delay: Duration) -> Result<(), SourceError> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| SourceError::Ack(e.to_string()))
    }
}

/// Dead-letter sink publishing to a NATS subject.
///
/// The original payload is forwarded unchanged with its key and schema
/// headers, plus the failure reason and attempt count.
pub struct NatsDeadLetters {
    client: async_nats::Client,
    subject: String,
}

impl NatsDeadLetters {
    /// Connect to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Disconnected`] if the server cannot be reached.
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, SourceError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SourceError::Disconnected(format!("connect: {e}")))?;
        Ok(Self {
            client,
            subject: subject.into(),
        })
    }
}

#[async_trait]
impl DeadLetterSink for NatsDeadLetters {
    async fn send(&self, letter: DeadLetter) -> Result<(), SourceError> {
        let mut headers = async_nats::HeaderMap::new();
        if let Some(key) = &letter.key {
            headers.insert(KEY_HEADER, key.as_str());
        }
        if let Some(schema) = &letter.schema {
            headers.insert(SCHEMA_HEADER, schema.as_str());
        }
        headers.insert(REASON_HEADER, letter.reason.as_str());
        headers.insert(ATTEMPTS_HEADER, letter.attempts.to_string().as_str());

        self.client
            .publish_with_headers(self.subject.clone(), headers, Bytes::from(letter.payload))
            .await
            .map_err(|e| SourceError::DeadLetter(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| SourceError::DeadLetter(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}
