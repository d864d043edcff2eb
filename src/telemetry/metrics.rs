//! Metric instrument factories for taskq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskq"` meter; without an
//! exporter they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: task submissions.
/// Labels: `task_type`, `result` ("ok" | "error").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: submissions where one of the two publishes failed.
/// Labels: `queue` (the queue whose publish failed).
pub fn publish_partial_failures() -> Counter<u64> {
    meter()
        .u64_counter("taskq.publish.partial_failures")
        .with_description("Submissions published to only one of the work and status queues")
        .build()
}

/// Counter: queue-level operations (create, send, read, delete, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: events folded into the projection.
/// Labels: `queue`, `status`.
pub fn events_applied() -> Counter<u64> {
    meter()
        .u64_counter("taskq.events.applied")
        .with_description("Number of queue events applied to the task projection")
        .build()
}

/// Counter: poison messages rejected without retry.
/// Labels: `queue`.
pub fn messages_rejected() -> Counter<u64> {
    meter()
        .u64_counter("taskq.messages.rejected")
        .with_description("Malformed queue messages archived without processing")
        .build()
}

/// Counter: tasks handled by the reference worker.
/// Labels: `task_type`, `outcome` ("completed" | "error" | "skipped").
pub fn worker_tasks() -> Counter<u64> {
    meter()
        .u64_counter("taskq.worker.tasks")
        .with_description("Number of tasks handled by the worker")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
