use std::collections::HashMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use taskq::config::Config;
use taskq::config::secrets::redact_uri;

fn load(vars: &[(&str, &str)]) -> taskq::error::Result<Config> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|name| vars.get(name).cloned())
}

#[test]
fn config_loads_defaults_with_only_required_fields() {
    let config = load(&[("MESSAGING_URI", "postgres://u:p@localhost/q")]).unwrap();

    assert_eq!(
        config.messaging_uri.expose_secret(),
        "postgres://u:p@localhost/q"
    );
    assert_eq!(config.bind_addr.port(), 8080);
    assert_eq!(config.otel_endpoint, None);
    assert_eq!(config.service_name, "taskq");
    assert_eq!(config.worker_name, "rust-worker");
    assert_eq!(config.queues.all(), ["tasks", "task_status", "results"]);
    assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    assert_eq!(config.request_timeout, None);
}

#[test]
fn config_reads_overrides() {
    let config = load(&[
        ("MESSAGING_URI", "memory://"),
        ("BIND_ADDR", "127.0.0.1:9000"),
        ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ("WORKER_NAME", "w-7"),
        ("TASKQ_WORK_QUEUE", "jobs"),
        ("TASKQ_RECONNECT_DELAY_SECS", "2"),
        ("TASKQ_POLL_INTERVAL_MS", " 50 "),
        ("TASKQ_REQUEST_TIMEOUT_SECS", "15"),
    ])
    .unwrap();

    assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
    assert_eq!(
        config.otel_endpoint.as_deref(),
        Some("http://collector:4317")
    );
    assert_eq!(config.worker_name, "w-7");
    assert_eq!(config.queues.work, "jobs");
    assert_eq!(config.queues.status, "task_status");
    assert_eq!(config.reconnect_delay, Duration::from_secs(2));
    assert_eq!(config.poll_interval, Duration::from_millis(50));
    assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
}

#[test]
fn config_fails_without_messaging_uri() {
    let err = load(&[]).unwrap_err();
    assert!(err.to_string().contains("MESSAGING_URI"));

    // Blank counts as unset.
    assert!(load(&[("MESSAGING_URI", "  ")]).is_err());
}

#[test]
fn config_rejects_malformed_numbers() {
    let err = load(&[
        ("MESSAGING_URI", "memory://"),
        ("TASKQ_VISIBILITY_TIMEOUT_SECS", "soon"),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("TASKQ_VISIBILITY_TIMEOUT_SECS"));

    assert!(load(&[("MESSAGING_URI", "memory://"), ("BIND_ADDR", "nowhere")]).is_err());
    assert!(
        load(&[
            ("MESSAGING_URI", "memory://"),
            ("TASKQ_REQUEST_TIMEOUT_SECS", "-1"),
        ])
        .is_err()
    );
}

#[test]
fn config_debug_does_not_leak_uri() {
    let config = load(&[("MESSAGING_URI", "postgres://user:hunter2@db/q")]).unwrap();
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn redact_uri_hides_credentials() {
    let uri = SecretString::from("postgres://user:hunter2@db:5432/q");
    assert_eq!(redact_uri(&uri), "postgres://***@db:5432/q");

    let plain = SecretString::from("memory://");
    assert_eq!(redact_uri(&plain), "memory://");

    let junk = SecretString::from("not a uri");
    assert_eq!(redact_uri(&junk), "***");
}
