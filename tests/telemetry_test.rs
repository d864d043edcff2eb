//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::trace::{TraceContextExt as _, TracerProvider as _};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use taskq::broker::Headers;
use taskq::telemetry::{TelemetryConfig, init_telemetry, messaging, task};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;
use tracing_subscriber::layer::SubscriberExt as _;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // init from another test returning Err is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "taskq-test".to_string(),
    };
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn task_span_records_outcome() {
    let span = task::start_task_span("w1", "echo", "t-1");
    task::record_outcome(&span, "completed");
}

#[test]
fn trace_context_round_trips_through_headers() {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let provider = SdkTracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));

    tracing::subscriber::with_default(subscriber, || {
        let publish = messaging::publish_span("memory", "task_status", "t-1");
        let headers = messaging::inject_context(&publish);
        assert!(headers.contains_key("traceparent"));

        let process = messaging::process_span("memory", "task_status", 7);
        messaging::attach_context(&process, &headers);

        let sent = publish.context().span().span_context().trace_id();
        let received = process.context().span().span_context().trace_id();
        assert_eq!(sent, received);
    });
}

#[test]
fn attach_without_headers_is_harmless() {
    let span = messaging::process_span("memory", "results", 1);
    messaging::attach_context(&span, &Headers::new());
}
