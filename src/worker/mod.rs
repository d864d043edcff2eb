//! Reference worker.
//!
//! Consumes the work queue and reports back through the status and results
//! queues. For every well-formed work message it publishes `processing`,
//! dispatches on the task type, then publishes exactly one terminal outcome:
//! a result event, an `error` status, or `skipped` for unknown types. The
//! work message is acknowledged only after that outcome has been published;
//! if publishing fails the message is left to reappear after its visibility
//! timeout.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use crate::broker::{Broker, ConnectionState, Delivery};
use crate::error::Result;
use crate::event::{ResultEvent, StatusEvent, WorkMessage};
use crate::model::TaskStatus;
use crate::publisher::Publisher;
use crate::telemetry::{messaging, metrics, task as task_span};

/// Domain logic for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The `type` tag this handler serves.
    fn task_type(&self) -> &str;

    /// Process a payload. An `Err` becomes an `error` status for the task.
    async fn handle(&self, payload: &str) -> Result<serde_json::Value>;
}

/// Handlers indexed by task type.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in `echo` and `analyze` handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(handlers::EchoHandler));
        registry.register(Arc::new(handlers::AnalyzeHandler));
        registry
    }

    /// Add a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity reported in status and result events.
    pub name: String,
    pub work_queue: String,
    pub poll_interval: Duration,
    /// Should exceed the slowest handler, or work is delivered twice.
    pub visibility_timeout: Duration,
    pub reconnect_delay: Duration,
}

/// Terminal outcome of one work message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed,
    Failed,
    Skipped,
    /// Undecodable work message, archived without any status events.
    Rejected,
}

impl WorkOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WorkOutcome::Completed => "completed",
            WorkOutcome::Failed => "error",
            WorkOutcome::Skipped => "skipped",
            WorkOutcome::Rejected => "rejected",
        }
    }
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    registry: Arc<HandlerRegistry>,
    connection: Arc<ConnectionState>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        publisher: Publisher,
        registry: Arc<HandlerRegistry>,
        connection: Arc<ConnectionState>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            publisher,
            registry,
            connection,
            config,
        }
    }

    /// Process work until cancelled. A task in progress is finished first.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            worker = %self.config.name,
            queue = %self.config.work_queue,
            task_types = ?self.registry.task_types(),
            "worker started"
        );

        while !cancel.is_cancelled() {
            if !self.connection.is_connected() && !self.connection.wait_connected(&cancel).await {
                break;
            }

            let pause = match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.poll_interval,
                Err(e) => {
                    warn!(worker = %self.config.name, error = %e, "work processing failed, backing off");
                    if e.is_connectivity() {
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

        info!(worker = %self.config.name, "worker stopped");
    }

    /// Receive and process at most one work message.
    pub async fn poll_once(&self) -> Result<Option<WorkOutcome>> {
        let delivery = self
            .broker
            .receive(&self.config.work_queue, self.config.visibility_timeout)
            .await?;
        match delivery {
            Some(delivery) => self.process(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    async fn process(&self, delivery: Delivery) -> Result<WorkOutcome> {
        let queue = self.config.work_queue.as_str();
        let span = messaging::process_span(self.broker.system(), queue, delivery.msg_id);
        messaging::attach_context(&span, &delivery.headers);

        async {
            let work = match WorkMessage::parse(&delivery.body) {
                Ok(work) => work,
                Err(e) => {
                    warn!(msg_id = delivery.msg_id, error = %e, "rejecting malformed work message");
                    metrics::messages_rejected().add(1, &[KeyValue::new("queue", queue.to_string())]);
                    self.broker.reject(queue, &delivery).await?;
                    return Ok(WorkOutcome::Rejected);
                }
            };
            tracing::Span::current().record("task.id", work.id.as_str());

            let outcome = self.execute(&work).await?;
            self.broker.ack(queue, &delivery).await?;

            metrics::worker_tasks().add(
                1,
                &[
                    KeyValue::new("task_type", work.task_type.clone()),
                    KeyValue::new("outcome", outcome.as_str()),
                ],
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Run the task and publish its terminal outcome.
    async fn execute(&self, work: &WorkMessage) -> Result<WorkOutcome> {
        let name = self.config.name.as_str();
        let span = task_span::start_task_span(name, &work.task_type, work.id.as_str());

        async {
            self.publisher
                .publish_status(
                    &StatusEvent::new(work.id.clone(), TaskStatus::Processing).worker(name),
                )
                .await?;

            let Some(handler) = self.registry.get(&work.task_type) else {
                let reason = format!("no handler for task type '{}'", work.task_type);
                info!(task.id = %work.id, %reason, "skipping task");
                self.publisher
                    .publish_status(
                        &StatusEvent::new(work.id.clone(), TaskStatus::Skipped)
                            .worker(name)
                            .reason(reason),
                    )
                    .await?;
                task_span::record_outcome(&span, WorkOutcome::Skipped.as_str());
                return Ok(WorkOutcome::Skipped);
            };

            let started = Instant::now();
            let result = handler.handle(&work.payload).await;
            metrics::operation_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", format!("task.{}", work.task_type))],
            );

            let outcome = match result {
                Ok(value) => {
                    self.publisher
                        .publish_result(&ResultEvent {
                            id: work.id.clone(),
                            worker: name.to_string(),
                            result: value,
                            completed_at: Some(Utc::now()),
                        })
                        .await?;
                    WorkOutcome::Completed
                }
                Err(e) => {
                    warn!(task.id = %work.id, error = %e, "task failed");
                    self.publisher
                        .publish_status(
                            &StatusEvent::new(work.id.clone(), TaskStatus::Error)
                                .worker(name)
                                .error(e.to_string()),
                        )
                        .await?;
                    WorkOutcome::Failed
                }
            };
            task_span::record_outcome(&span, outcome.as_str());
            Ok(outcome)
        }
        .instrument(span.clone())
        .await
    }
}
