//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.delete, pgmq.archive. Requires pgmq 1.5+ for message headers.

use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{Broker, Delivery, Headers, OutboundMessage};
use crate::error::Result;
use crate::telemetry::metrics;

/// Broker backed by Postgres queues. Owns the connection pool; sqlx
/// re-establishes dropped connections on the next acquire.
pub struct PgmqBroker {
    pool: PgPool,
}

impl PgmqBroker {
    /// Create the pool without connecting. Connection problems surface on
    /// first use, so startup can proceed while the broker is still down.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Connect eagerly, failing if Postgres is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    fn record(queue: &str, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

#[async_trait]
impl Broker for PgmqBroker {
    fn system(&self) -> &'static str {
        "pgmq"
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Self::record(queue, "create");
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<i64> {
        let headers = serde_json::to_value(&message.headers)?;
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3, $4)")
            .bind(queue)
            .bind(&message.body)
            .bind(&headers)
            .bind(0i32)
            .fetch_one(&self.pool)
            .await?;
        Self::record(queue, "send");
        Ok(row.0)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>> {
        let vt = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
                Option<serde_json::Value>,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, message, headers FROM pgmq.read($1, $2, 1)",
        )
        .bind(queue)
        .bind(vt)
        .fetch_optional(&self.pool)
        .await?;

        let delivery = row.map(|(msg_id, read_ct, enqueued_at, body, headers)| Delivery {
            msg_id,
            read_ct,
            enqueued_at,
            body,
            headers: headers.map(headers_from_json).unwrap_or_default(),
        });

        Self::record(
            queue,
            if delivery.is_some() {
                "read"
            } else {
                "read_empty"
            },
        );
        Ok(delivery)
    }

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue)
            .bind(delivery.msg_id)
            .execute(&self.pool)
            .await?;
        Self::record(queue, "delete");
        Ok(())
    }

    async fn reject(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue)
            .bind(delivery.msg_id)
            .execute(&self.pool)
            .await?;
        Self::record(queue, "archive");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Keep string-valued headers; other publishers may attach anything.
fn headers_from_json(value: serde_json::Value) -> Headers {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => Headers::new(),
    }
}
