//! In-memory task projection.
//!
//! A read cache derived from the status and results queues. The broker is
//! the source of truth: this map is never persisted, starts empty, and only
//! loses entries through [`TaskProjection::clear`]. Consumer loops are the
//! only writers; request handlers only read.
//!
//! Entries are spread over a fixed set of `RwLock`-guarded shards keyed by a
//! hash of the task id, so work on different ids rarely touches the same
//! lock. Locks are never held across an `.await`.

use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};

use chrono::Utc;
use parking_lot::RwLock;

use crate::event::{QueueEvent, ResultEvent, StatusEvent};
use crate::model::{Task, TaskId, TaskStatus};

const SHARD_COUNT: usize = 16;

/// What applying an event did to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The task was not known and has been created from the event.
    Inserted,
    /// An existing entry changed.
    Updated,
    /// The event carried nothing new (duplicate or superseded).
    Unchanged,
}

pub struct TaskProjection {
    shards: Vec<RwLock<HashMap<TaskId, Task>>>,
}

impl Default for TaskProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskProjection {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, id: &TaskId) -> &RwLock<HashMap<TaskId, Task>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn apply(&self, event: &QueueEvent) -> Applied {
        match event {
            QueueEvent::Status(e) => self.apply_status(e),
            QueueEvent::Result(e) => self.apply_result(e),
        }
    }

    /// Fold a status event into the projection.
    ///
    /// A status never moves a task backwards in its lifecycle; a lower-ranked
    /// event can still fill fields the entry is missing.
    pub fn apply_status(&self, event: &StatusEvent) -> Applied {
        let now = Utc::now();
        let mut shard = self.shard(&event.id).write();

        let task = match shard.entry(event.id.clone()) {
            Entry::Vacant(slot) => {
                let status = event.status;
                slot.insert(Task {
                    id: event.id.clone(),
                    task_type: event.task_type.clone(),
                    payload: event.payload.clone(),
                    status,
                    worker: event.worker.clone(),
                    result: None,
                    error: (status == TaskStatus::Error)
                        .then(|| event.error.clone())
                        .flatten(),
                    reason: (status == TaskStatus::Skipped)
                        .then(|| event.reason.clone())
                        .flatten(),
                    created_at: event.created_at.unwrap_or(now),
                    completed_at: status
                        .is_terminal()
                        .then(|| event.timestamp.unwrap_or(now)),
                    created_at_known: event.created_at.is_some(),
                });
                return Applied::Inserted;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let before = task.clone();
        fill_missing(task, event);

        if task.status.superseded_by(event.status) {
            let previous = task.status;
            task.status = event.status;
            if let Some(ref worker) = event.worker {
                task.worker = Some(worker.clone());
            }
            match event.status {
                TaskStatus::Error => {
                    task.error = event.error.clone().or(task.error.take());
                    task.result = None;
                    task.reason = None;
                }
                TaskStatus::Skipped => {
                    task.reason = event.reason.clone().or(task.reason.take());
                    task.result = None;
                    task.error = None;
                }
                TaskStatus::Completed => {
                    task.error = None;
                    task.reason = None;
                }
                TaskStatus::Queued | TaskStatus::Processing => {
                    task.error = None;
                    task.reason = None;
                    task.result = None;
                }
            }
            if !event.status.is_terminal() {
                task.completed_at = None;
            } else if task.completed_at.is_none() || previous != event.status {
                task.completed_at = Some(event.timestamp.unwrap_or(now));
            }
        }

        if *task == before {
            Applied::Unchanged
        } else {
            Applied::Updated
        }
    }

    /// Fold a result event into the projection. Results always mark the task
    /// completed, whether or not any status event was seen first.
    pub fn apply_result(&self, event: &ResultEvent) -> Applied {
        let now = Utc::now();
        let mut shard = self.shard(&event.id).write();

        let task = match shard.entry(event.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Task {
                    id: event.id.clone(),
                    task_type: None,
                    payload: None,
                    status: TaskStatus::Completed,
                    worker: Some(event.worker.clone()),
                    result: Some(event.result.clone()),
                    error: None,
                    reason: None,
                    created_at: now,
                    completed_at: Some(event.completed_at.unwrap_or(now)),
                    created_at_known: false,
                });
                return Applied::Inserted;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let before = task.clone();
        let completed_at = match (event.completed_at, task.status, task.completed_at) {
            (Some(at), _, _) => at,
            (None, TaskStatus::Completed, Some(at)) => at,
            (None, _, _) => now,
        };
        task.status = TaskStatus::Completed;
        task.worker = Some(event.worker.clone());
        task.result = Some(event.result.clone());
        task.error = None;
        task.reason = None;
        task.completed_at = Some(completed_at);

        if *task == before {
            Applied::Unchanged
        } else {
            Applied::Updated
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.shard(id).read().get(id).cloned()
    }

    /// All tasks, newest first by creation time.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        tasks
    }

    /// Drop every cached entry and return how many there were.
    ///
    /// Only the view is cleared. Messages still on the broker will recreate
    /// their tasks as they are consumed.
    pub fn clear(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut guard = shard.write();
                let n = guard.len();
                guard.clear();
                n
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fill_missing(task: &mut Task, event: &StatusEvent) {
    if task.task_type.is_none() {
        task.task_type = event.task_type.clone();
    }
    if task.payload.is_none() {
        task.payload = event.payload.clone();
    }
    if !task.created_at_known
        && let Some(created_at) = event.created_at
    {
        task.created_at = created_at;
        task.created_at_known = true;
    }
}
