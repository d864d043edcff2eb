//! Messaging span helpers and trace-context propagation.
//!
//! Span fields follow the OpenTelemetry messaging conventions:
//! - `messaging.system`
//! - `messaging.destination.name`
//! - `messaging.operation`
//! - `messaging.message.id`
//!
//! Trace context travels in message headers as W3C `traceparent` /
//! `tracestate`, using whatever propagator is registered globally.

use opentelemetry::global;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

use crate::broker::Headers;

/// Start a producer span for publishing to `queue`.
pub fn publish_span(system: &str, queue: &str, task_id: &str) -> Span {
    tracing::info_span!(
        "queue.publish",
        "otel.kind" = "producer",
        "messaging.system" = system,
        "messaging.destination.name" = queue,
        "messaging.operation" = "publish",
        "task.id" = task_id,
    )
}

/// Start a consumer span for processing one delivery from `queue`.
///
/// `task.id` and `task.status` are declared empty and filled in once the
/// body has been decoded.
pub fn process_span(system: &str, queue: &str, msg_id: i64) -> Span {
    tracing::info_span!(
        "queue.process",
        "otel.kind" = "consumer",
        "messaging.system" = system,
        "messaging.destination.name" = queue,
        "messaging.operation" = "process",
        "messaging.message.id" = msg_id,
        "task.id" = tracing::field::Empty,
        "task.status" = tracing::field::Empty,
    )
}

/// Serialize the span's trace context into message headers.
pub fn inject_context(span: &Span) -> Headers {
    let cx = span.context();
    let mut headers = Headers::new();
    global::get_text_map_propagator(|propagator| propagator.inject_context(&cx, &mut headers));
    headers
}

/// Parent `span` on the trace context carried by incoming headers.
pub fn attach_context(span: &Span, headers: &Headers) {
    let parent = global::get_text_map_propagator(|propagator| propagator.extract(headers));
    let _ = span.set_parent(parent);
}
