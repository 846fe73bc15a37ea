//! # feed-consumer
//!
//! Inbound post-created notifications and the loop that fans them out.
//!
//! This crate provides:
//!
//! - **NotificationSource** - A stream of deliveries settled by ack or nack
//! - **MemoryQueue** - In-process source for tests and benchmarks
//! - **JetStreamSource** - NATS JetStream pull consumer (feature `nats`)
//! - **EventConsumer** - Sequential decode, fan-out and acknowledge loop with
//!   bounded retries and a dead-letter sink
//!
//! ```rust,ignore
//! use feed_consumer::{ConsumerConfig, EventConsumer, MemoryDeadLetters, MemoryQueue};
//!
//! let queue = MemoryQueue::new();
//! let consumer = EventConsumer::new(
//!     Box::new(queue.source()),
//!     engine,
//!     Arc::new(MemoryDeadLetters::new()),
//!     ConsumerConfig::default(),
//! );
//! let stats = consumer.run(cancel).await?;
//! ```

pub mod consumer;
pub mod memory;
pub mod traits;

#[cfg(feature = "nats")]
pub mod jetstream;

pub use consumer::{ConsumerConfig, ConsumerError, ConsumerState, ConsumerStats, EventConsumer, Outcome};
pub use memory::{MemoryDeadLetters, MemoryQueue, MemorySource};
pub use traits::{DeadLetter, DeadLetterSink, Delivery, NotificationSource, SourceError};

#[cfg(feature = "nats")]
pub use jetstream::{JetStreamConfig, JetStreamSource, NatsDeadLetters};
