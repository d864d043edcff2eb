//! Publisher channel: the only path that writes to the broker.
//!
//! Submitting a task publishes a `queued` status event and a work message.
//! The two publishes are independent and not transactional; if only one
//! lands the submission still fails for the caller and the gap is logged.
//! Nothing here touches the projection.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Instrument, debug, warn};

use crate::broker::{Broker, ConnectionState, OutboundMessage};
use crate::config::QueueNames;
use crate::error::{Error, Result};
use crate::event::{ResultEvent, StatusEvent, WorkMessage};
use crate::model::{NewTask, Submission, TaskId, TaskStatus};
use crate::telemetry::{messaging, metrics};

#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    queues: QueueNames,
    connection: Arc<ConnectionState>,
}

impl Publisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        queues: QueueNames,
        connection: Arc<ConnectionState>,
    ) -> Self {
        Self {
            broker,
            queues,
            connection,
        }
    }

    /// Submit a task: publish its `queued` status and its work message.
    ///
    /// Returns as soon as both publishes are done. The returned status is
    /// advisory; readers see the task once the status event is consumed.
    pub async fn submit(&self, new: NewTask) -> Result<Submission> {
        self.ensure_connected()?;

        let id = TaskId::generate();
        let created_at = Utc::now();
        let status = StatusEvent {
            task_type: Some(new.task_type.clone()),
            payload: Some(new.payload.clone()),
            created_at: Some(created_at),
            timestamp: Some(created_at),
            ..StatusEvent::new(id.clone(), TaskStatus::Queued)
        };
        let work = WorkMessage {
            id: id.clone(),
            task_type: new.task_type.clone(),
            payload: new.payload.clone(),
        };

        let span = tracing::info_span!("task.submit", "task.id" = %id, "task.type" = %new.task_type);
        let (status_sent, work_sent) = async {
            tokio::join!(self.publish_status(&status), self.publish_work(&work))
        }
        .instrument(span)
        .await;

        let outcome = match (status_sent, work_sent) {
            (Ok(_), Ok(_)) => Ok(()),
            (Ok(_), Err(e)) => {
                self.partial_publish(&id, &self.queues.work, &e);
                Err(e)
            }
            (Err(e), Ok(_)) => {
                self.partial_publish(&id, &self.queues.status, &e);
                Err(e)
            }
            (Err(e), Err(_)) => Err(e),
        };

        metrics::tasks_submitted().add(
            1,
            &[
                KeyValue::new("task_type", new.task_type.clone()),
                KeyValue::new("result", if outcome.is_ok() { "ok" } else { "error" }),
            ],
        );
        outcome?;

        debug!(task.id = %id, task_type = %new.task_type, "task submitted");
        Ok(Submission {
            id,
            task_type: new.task_type,
            payload: new.payload,
            status: TaskStatus::Queued,
            created_at,
        })
    }

    pub async fn publish_status(&self, event: &StatusEvent) -> Result<i64> {
        self.publish_json(&self.queues.status, &event.id, event).await
    }

    pub async fn publish_result(&self, event: &ResultEvent) -> Result<i64> {
        self.publish_json(&self.queues.results, &event.id, event).await
    }

    pub async fn publish_work(&self, message: &WorkMessage) -> Result<i64> {
        self.publish_json(&self.queues.work, &message.id, message)
            .await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable(
                "not connected to the message broker".to_string(),
            ))
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        queue: &str,
        task_id: &TaskId,
        body: &T,
    ) -> Result<i64> {
        self.ensure_connected()?;
        let span = messaging::publish_span(self.broker.system(), queue, task_id.as_str());
        let message =
            OutboundMessage::new(serde_json::to_value(body)?).with_headers(messaging::inject_context(&span));
        self.broker
            .publish(queue, message)
            .instrument(span)
            .await
    }

    fn partial_publish(&self, id: &TaskId, failed_queue: &str, error: &Error) {
        warn!(
            task.id = %id,
            queue = failed_queue,
            error = %error,
            "partial publish: task reached only one of the work and status queues"
        );
        metrics::publish_partial_failures()
            .add(1, &[KeyValue::new("queue", failed_queue.to_string())]);
    }
}
