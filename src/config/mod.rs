//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The broker URI carries credentials, so it is wrapped in
//! secrecy::SecretString to keep it out of logs.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Names of the three broker queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Work items consumed by workers.
    pub work: String,
    /// Status events (queued, processing, error, skipped, ...).
    pub status: String,
    /// Result events published by workers on completion.
    pub results: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            work: "tasks".to_string(),
            status: "task_status".to_string(),
            results: "results".to_string(),
        }
    }
}

impl QueueNames {
    /// All queue names, in declaration order.
    pub fn all(&self) -> [&str; 3] {
        [&self.work, &self.status, &self.results]
    }
}

#[derive(Debug)]
pub struct Config {
    pub messaging_uri: SecretString,
    pub bind_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub service_name: String,
    pub worker_name: String,
    pub queues: QueueNames,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Per-request HTTP timeout; unset means none.
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = QueueNames::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            messaging_uri: SecretString::from(
                var("MESSAGING_URI").ok_or_else(|| missing("MESSAGING_URI"))?,
            ),
            bind_addr: parse_or(var("BIND_ADDR"), "BIND_ADDR", "0.0.0.0:8080".parse().ok())?,
            otel_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            service_name: var("OTEL_SERVICE_NAME").unwrap_or_else(|| "taskq".to_string()),
            worker_name: var("WORKER_NAME").unwrap_or_else(|| "rust-worker".to_string()),
            queues: QueueNames {
                work: var("TASKQ_WORK_QUEUE").unwrap_or(defaults.work),
                status: var("TASKQ_STATUS_QUEUE").unwrap_or(defaults.status),
                results: var("TASKQ_RESULTS_QUEUE").unwrap_or(defaults.results),
            },
            reconnect_delay: Duration::from_secs(parse_or(
                var("TASKQ_RECONNECT_DELAY_SECS"),
                "TASKQ_RECONNECT_DELAY_SECS",
                Some(5),
            )?),
            poll_interval: Duration::from_millis(parse_or(
                var("TASKQ_POLL_INTERVAL_MS"),
                "TASKQ_POLL_INTERVAL_MS",
                Some(250),
            )?),
            visibility_timeout: Duration::from_secs(parse_or(
                var("TASKQ_VISIBILITY_TIMEOUT_SECS"),
                "TASKQ_VISIBILITY_TIMEOUT_SECS",
                Some(30),
            )?),
            shutdown_timeout: Duration::from_secs(parse_or(
                var("TASKQ_SHUTDOWN_TIMEOUT_SECS"),
                "TASKQ_SHUTDOWN_TIMEOUT_SECS",
                Some(10),
            )?),
            request_timeout: var("TASKQ_REQUEST_TIMEOUT_SECS")
                .map(|raw| parse_or(Some(raw), "TASKQ_REQUEST_TIMEOUT_SECS", None))
                .transpose()?
                .map(Duration::from_secs),
        })
    }
}

fn missing(name: &str) -> Error {
    Error::Config(format!("required environment variable {name} is not set"))
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: Option<T>) -> Result<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {value:?}"))),
        None => default.ok_or_else(|| missing(name)),
    }
}
