//! Core data model.
//!
//! A task is a unit of work submitted over HTTP and processed by an external
//! worker. Its view here is derived entirely from broker events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Task Id
// ---------------------------------------------------------------------------

/// Opaque task identifier.
///
/// Generated ids are UUIDv7 (time-ordered prefix, random tail), but ids
/// arriving from workers are accepted as any non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing id. Returns `None` for blank input.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, waiting for a worker.
    Queued,
    /// A worker picked it up.
    Processing,
    /// Finished with a result. Terminal.
    Completed,
    /// Worker reported a failure. Terminal.
    Error,
    /// No worker recognised the task type. Terminal.
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Skipped
        )
    }

    /// Position in the lifecycle. An event never moves a task to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Skipped => 2,
        }
    }

    /// Does an event carrying `next` supersede the current status?
    pub fn superseded_by(self, next: TaskStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The projected view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    /// Worker class selector. Absent when the task was first seen through
    /// an event that did not carry it.
    #[serde(rename = "type")]
    pub task_type: Option<String>,

    pub payload: Option<String>,

    pub status: TaskStatus,

    /// Worker instance that last touched the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Present only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Present only when errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Why a worker skipped the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// False while `created_at` is the time of first projection rather than
    /// the submission timestamp.
    #[serde(skip, default = "default_true")]
    pub(crate) created_at_known: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A validated submission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub(crate) task_type: String,
    pub(crate) payload: String,
}

impl NewTask {
    /// Validate and build a submission. Both fields must be non-empty.
    pub fn new(
        task_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> crate::error::Result<Self> {
        let task_type = task_type.into().trim().to_string();
        let payload = payload.into();
        if task_type.is_empty() {
            return Err(crate::error::Error::InvalidInput(
                "type is required".to_string(),
            ));
        }
        if payload.is_empty() {
            return Err(crate::error::Error::InvalidInput(
                "payload is required".to_string(),
            ));
        }
        Ok(Self { task_type, payload })
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// What the caller gets back from a submission. Advisory: the projection
/// only reflects the task once the `queued` event has been consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}
