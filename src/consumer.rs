//! Consumer loops: drain the status and results queues into the projection.
//!
//! One loop per queue, each an independent background task. A message is
//! acknowledged only after its event has been applied; a message that cannot
//! be decoded is rejected (archived) and never retried.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::broker::{Broker, ConnectionState, Delivery};
use crate::error::Result;
use crate::event::{EventQueue, QueueEvent};
use crate::projection::{Applied, TaskProjection};
use crate::telemetry::{messaging, metrics};

/// Timing knobs shared by the consumer loops.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Delay before polling again when the queue is empty.
    pub poll_interval: Duration,
    /// How long a received message stays invisible to other readers.
    pub visibility_timeout: Duration,
    /// Delay before retrying after a broker error.
    pub reconnect_delay: Duration,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Decoded, applied and acknowledged.
    Applied(Applied),
    /// Undecodable; archived without applying.
    Rejected,
}

pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    projection: Arc<TaskProjection>,
    connection: Arc<ConnectionState>,
    queue: EventQueue,
    queue_name: String,
    config: ConsumerConfig,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        projection: Arc<TaskProjection>,
        connection: Arc<ConnectionState>,
        queue: EventQueue,
        queue_name: impl Into<String>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            projection,
            connection,
            queue,
            queue_name: queue_name.into(),
            config,
        }
    }

    /// Consume until cancelled.
    ///
    /// Cancellation is observed only between deliveries, so a message being
    /// handled is applied and acknowledged before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.queue_name, kind = self.queue.as_str(), "consumer started");

        while !cancel.is_cancelled() {
            if !self.connection.is_connected() && !self.connection.wait_connected(&cancel).await {
                break;
            }

            let pause = match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.poll_interval,
                Err(e) => {
                    warn!(queue = %self.queue_name, error = %e, "consume failed, backing off");
                    if e.is_connectivity() {
                        // Park until the monitor has re-declared the queues.
                        self.connection.set_connected(false);
                    }
                    self.config.reconnect_delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(queue = %self.queue_name, "consumer stopped");
    }

    /// Receive and handle at most one message. `None` when the queue is empty.
    pub async fn poll_once(&self) -> Result<Option<Handled>> {
        let delivery = self
            .broker
            .receive(&self.queue_name, self.config.visibility_timeout)
            .await?;
        match delivery {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Handle messages until the queue is empty. Returns how many were handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.poll_once().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle(&self, delivery: Delivery) -> Result<Handled> {
        let span = messaging::process_span(self.broker.system(), &self.queue_name, delivery.msg_id);
        messaging::attach_context(&span, &delivery.headers);

        async {
            let event = match QueueEvent::decode(self.queue, &delivery.body) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        queue = %self.queue_name,
                        msg_id = delivery.msg_id,
                        error = %e,
                        "rejecting malformed message"
                    );
                    metrics::messages_rejected()
                        .add(1, &[KeyValue::new("queue", self.queue_name.clone())]);
                    self.broker.reject(&self.queue_name, &delivery).await?;
                    return Ok(Handled::Rejected);
                }
            };

            let span = tracing::Span::current();
            span.record("task.id", event.task_id().as_str());
            span.record("task.status", tracing::field::display(event.status()));

            let applied = self.projection.apply(&event);
            metrics::events_applied().add(
                1,
                &[
                    KeyValue::new("queue", self.queue_name.clone()),
                    KeyValue::new("status", event.status().to_string()),
                ],
            );
            debug!(task.id = %event.task_id(), status = %event.status(), ?applied, "event applied");

            self.broker.ack(&self.queue_name, &delivery).await?;
            Ok(Handled::Applied(applied))
        }
        .instrument(span)
        .await
    }
}
