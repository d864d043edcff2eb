//! Message broker abstraction.
//!
//! The broker is the system of record for tasks: durable queues with
//! at-least-once delivery and per-message headers. Two implementations:
//! [`PgmqBroker`] (Postgres + pgmq) for real deployments and
//! [`InMemoryBroker`] for tests and single-process development.

pub mod memory;
pub mod monitor;
pub mod pgmq;

pub use memory::InMemoryBroker;
pub use monitor::{ConnectionState, declare_queues, supervise_connection};
pub use pgmq::PgmqBroker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;

/// Message headers. Carries serialized trace context.
pub type Headers = HashMap<String, String>;

/// A message to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: serde_json::Value,
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// A message received from a queue. It stays invisible to other readers
/// until its visibility timeout lapses, and is removed only by
/// [`Broker::ack`] or [`Broker::reject`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub msg_id: i64,
    /// How many times this message has been read, including this read.
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub body: serde_json::Value,
    pub headers: Headers,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Messaging system name reported on spans (e.g. "pgmq").
    fn system(&self) -> &'static str;

    /// Create a durable queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Publish a message. Returns the broker-assigned message id.
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<i64>;

    /// Take the next visible message, if any, without waiting.
    async fn receive(&self, queue: &str, visibility_timeout: Duration)
    -> Result<Option<Delivery>>;

    /// Acknowledge a processed message; it is removed from the queue.
    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()>;

    /// Discard a message that can never be processed. Kept aside for audit,
    /// never redelivered.
    async fn reject(&self, queue: &str, delivery: &Delivery) -> Result<()>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

/// Build a broker from its URI: `memory://` selects the in-process broker,
/// anything else is treated as a Postgres connection string.
pub fn connect(uri: &SecretString) -> Result<Arc<dyn Broker>> {
    let raw = uri.expose_secret();
    if raw.starts_with("memory://") {
        Ok(Arc::new(InMemoryBroker::new()))
    } else {
        Ok(Arc::new(PgmqBroker::connect_lazy(raw)?))
    }
}
