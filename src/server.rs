//! Service assembly: broker, projection, consumer loops and HTTP server.
//!
//! Every component is built once here and handed out explicitly; nothing is
//! global. Shutdown cancels a shared token: the HTTP server stops accepting
//! and drains, consumer loops finish the delivery in hand, and the whole
//! drain is bounded by the configured shutdown timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::broker::{Broker, ConnectionState, supervise_connection};
use crate::config::{Config, QueueNames};
use crate::consumer::{ConsumerConfig, EventConsumer};
use crate::error::{Error, Result};
use crate::event::EventQueue;
use crate::projection::TaskProjection;
use crate::publisher::Publisher;
use crate::worker::{HandlerRegistry, Worker, WorkerConfig};

/// The projector service and everything it owns.
pub struct App {
    broker: Arc<dyn Broker>,
    projection: Arc<TaskProjection>,
    connection: Arc<ConnectionState>,
    publisher: Publisher,
    queues: QueueNames,
    consumer_config: ConsumerConfig,
    shutdown_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl App {
    pub fn new(broker: Arc<dyn Broker>, config: &Config) -> Self {
        let connection = Arc::new(ConnectionState::new());
        let publisher = Publisher::new(
            Arc::clone(&broker),
            config.queues.clone(),
            Arc::clone(&connection),
        );
        Self {
            broker,
            projection: Arc::new(TaskProjection::new()),
            connection,
            publisher,
            queues: config.queues.clone(),
            consumer_config: ConsumerConfig {
                poll_interval: config.poll_interval,
                visibility_timeout: config.visibility_timeout,
                reconnect_delay: config.reconnect_delay,
            },
            shutdown_timeout: config.shutdown_timeout,
            request_timeout: config.request_timeout,
        }
    }

    pub fn projection(&self) -> &Arc<TaskProjection> {
        &self.projection
    }

    pub fn connection(&self) -> &Arc<ConnectionState> {
        &self.connection
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn state(&self) -> AppState {
        let state = AppState::new(
            Arc::clone(&self.projection),
            self.publisher.clone(),
            Arc::clone(&self.connection),
        );
        match self.request_timeout {
            Some(timeout) => state.with_request_timeout(timeout),
            None => state,
        }
    }

    /// A consumer loop for one of the event queues.
    pub fn consumer(&self, queue: EventQueue) -> EventConsumer {
        let name = match queue {
            EventQueue::Status => &self.queues.status,
            EventQueue::Results => &self.queues.results,
        };
        EventConsumer::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.projection),
            Arc::clone(&self.connection),
            queue,
            name.clone(),
            self.consumer_config.clone(),
        )
    }

    /// A reference worker sharing this service's broker connection.
    pub fn worker(&self, name: impl Into<String>) -> Worker {
        Worker::new(
            Arc::clone(&self.broker),
            self.publisher.clone(),
            Arc::new(HandlerRegistry::with_defaults()),
            Arc::clone(&self.connection),
            WorkerConfig {
                name: name.into(),
                work_queue: self.queues.work.clone(),
                poll_interval: self.consumer_config.poll_interval,
                visibility_timeout: self.consumer_config.visibility_timeout,
                reconnect_delay: self.consumer_config.reconnect_delay,
            },
        )
    }

    /// Spawn the task that declares queues and tracks broker reachability.
    pub fn spawn_monitor(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        tokio::spawn(supervise_connection(
            Arc::clone(&self.broker),
            self.queues.clone(),
            Arc::clone(&self.connection),
            self.consumer_config.reconnect_delay,
            cancel.clone(),
        ))
    }

    /// Spawn the connection monitor and one consumer per event queue.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_monitor(cancel),
            tokio::spawn(self.consumer(EventQueue::Status).run(cancel.clone())),
            tokio::spawn(self.consumer(EventQueue::Results).run(cancel.clone())),
        ]
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then drain.
    ///
    /// With `embedded_worker` set, a reference worker runs in-process too.
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
        embedded_worker: Option<String>,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let mut tasks = self.spawn_background(&cancel);
        if let Some(name) = embedded_worker {
            tasks.push(tokio::spawn(self.worker(name).run(cancel.clone())));
        }

        let addr = listener.local_addr()?;
        let router = api::router(self.state());
        let server_cancel = cancel.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
        });
        info!(%addr, "listening");

        let exited_early = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested, draining");
                None
            }
            res = &mut server => Some(res),
        };
        cancel.cancel();

        let drain = async {
            let server_result = match exited_early {
                Some(res) => res,
                None => server.await,
            };
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "background task panicked");
                }
            }
            server_result
        };

        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(Ok(Ok(()))) => {
                info!("shutdown complete");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(Error::Io(e)),
            Ok(Err(e)) => Err(Error::Other(format!("http server task failed: {e}"))),
            Err(_) => {
                warn!(timeout = ?self.shutdown_timeout, "shutdown timed out, abandoning in-flight work");
                Ok(())
            }
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
