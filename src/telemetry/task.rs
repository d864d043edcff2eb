//! Task execution span helpers for the worker.

use tracing::Span;

/// Start a span for one task execution.
///
/// `task.outcome` is declared empty and is set via [`record_outcome`].
pub fn start_task_span(worker: &str, task_type: &str, task_id: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.worker" = worker,
        "task.type" = task_type,
        "task.id" = task_id,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record the terminal outcome of a task on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome = outcome, "task finished");
    });
}
