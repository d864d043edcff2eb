//! Typed broker messages, one shape per queue.
//!
//! Bodies arrive as arbitrary JSON from workers written in any language.
//! Each shape is parsed and validated here; anything that does not fit is
//! a [`Error::MalformedMessage`] and is never retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{TaskId, TaskStatus};

/// A work item on the work queue, consumed by workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkMessage {
    #[serde(alias = "taskId")]
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(alias = "data")]
    pub payload: String,
}

/// A status change published to the status queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(alias = "taskId")]
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task_type: Option<String>,
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the publisher emitted the event.
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StatusEvent {
    /// A bare status event for `id`, stamped now.
    pub fn new(id: TaskId, status: TaskStatus) -> Self {
        Self {
            id,
            status,
            task_type: None,
            payload: None,
            created_at: None,
            worker: None,
            error: None,
            reason: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn parse(body: &serde_json::Value) -> Result<Self> {
        let event: Self = decode(body, "status event")?;
        require_id(&event.id)?;
        Ok(event)
    }
}

/// A completion published to the results queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    #[serde(alias = "taskId")]
    pub id: TaskId,
    pub worker: String,
    pub result: serde_json::Value,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResultEvent {
    pub fn parse(body: &serde_json::Value) -> Result<Self> {
        let event: Self = decode(body, "result event")?;
        require_id(&event.id)?;
        if event.worker.trim().is_empty() {
            return Err(Error::MalformedMessage(format!(
                "result event for {} has an empty worker",
                event.id
            )));
        }
        Ok(event)
    }
}

impl WorkMessage {
    pub fn parse(body: &serde_json::Value) -> Result<Self> {
        let msg: Self = decode(body, "work message")?;
        require_id(&msg.id)?;
        Ok(msg)
    }
}

/// The queues the projector consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventQueue {
    Status,
    Results,
}

impl EventQueue {
    pub fn as_str(self) -> &'static str {
        match self {
            EventQueue::Status => "status",
            EventQueue::Results => "results",
        }
    }
}

/// An event consumed from one of the projector's queues.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Status(StatusEvent),
    Result(ResultEvent),
}

impl QueueEvent {
    /// Decode a message body according to the queue it came from.
    pub fn decode(queue: EventQueue, body: &serde_json::Value) -> Result<Self> {
        match queue {
            EventQueue::Status => StatusEvent::parse(body).map(QueueEvent::Status),
            EventQueue::Results => ResultEvent::parse(body).map(QueueEvent::Result),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            QueueEvent::Status(e) => &e.id,
            QueueEvent::Result(e) => &e.id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            QueueEvent::Status(e) => e.status,
            QueueEvent::Result(_) => TaskStatus::Completed,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &serde_json::Value, what: &str) -> Result<T> {
    T::deserialize(body).map_err(|e| Error::MalformedMessage(format!("{what}: {e}")))
}

fn require_id(id: &TaskId) -> Result<()> {
    if id.as_str().trim().is_empty() {
        return Err(Error::MalformedMessage("empty task id".to_string()));
    }
    Ok(())
}

/// Lenient timestamp parsing. Workers in other languages commonly emit
/// ISO-8601 without an offset; those are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        parse(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
