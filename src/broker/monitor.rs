//! Broker connectivity tracking.
//!
//! One supervisor task owns the connection state: it declares the queues
//! until that succeeds, then pings at a fixed interval. Publishers consult
//! the state to fail fast; consumer loops park on it while disconnected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Broker;
use crate::config::QueueNames;
use crate::error::Result;

/// Shared view of whether the broker is reachable and its queues exist.
pub struct ConnectionState {
    tx: watch::Sender<bool>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Starts disconnected; nothing is ready until the queues are declared.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the state, logging transitions.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed {
            if connected {
                info!("broker connected");
            } else {
                warn!("broker disconnected");
            }
        }
    }

    /// Wait until connected. Returns `false` if cancelled first.
    pub async fn wait_connected(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        let connected = async move { rx.wait_for(|connected| *connected).await.is_ok() };
        tokio::select! {
            _ = cancel.cancelled() => false,
            ok = connected => ok,
        }
    }
}

/// Declare every queue. Any failure leaves the broker not ready.
pub async fn declare_queues(broker: &dyn Broker, queues: &QueueNames) -> Result<()> {
    for queue in queues.all() {
        broker.declare_queue(queue).await?;
    }
    Ok(())
}

/// Keep `state` in step with the broker until cancelled.
///
/// While disconnected each attempt re-declares the queues, so a broker that
/// came back empty is usable again; while connected a ping suffices.
pub async fn supervise_connection(
    broker: Arc<dyn Broker>,
    queues: QueueNames,
    state: Arc<ConnectionState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let attempt = if state.is_connected() {
            broker.ping().await
        } else {
            declare_queues(broker.as_ref(), &queues).await
        };
        match attempt {
            Ok(()) => state.set_connected(true),
            Err(e) => {
                if state.is_connected() {
                    warn!(error = %e, "broker health check failed");
                } else {
                    warn!(error = %e, retry_in = ?interval, "broker not ready");
                }
                state.set_connected(false);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
