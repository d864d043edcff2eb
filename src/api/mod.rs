//! HTTP surface: task submission, projection reads, health.

pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::routing::get;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::broker::ConnectionState;
use crate::projection::TaskProjection;
use crate::publisher::Publisher;

use self::error::ApiError;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub projection: Arc<TaskProjection>,
    pub publisher: Publisher,
    pub connection: Arc<ConnectionState>,
    /// Optional per-request timeout.
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        projection: Arc<TaskProjection>,
        publisher: Publisher,
        connection: Arc<ConnectionState>,
    ) -> Self {
        Self {
            projection,
            publisher,
            connection,
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let request_timeout = state.request_timeout;

    let router = Router::new()
        .route(
            "/tasks",
            get(routes::list_tasks)
                .post(routes::submit_task)
                .delete(routes::clear_tasks),
        )
        .route("/tasks/{id}", get(routes::get_task))
        .route("/health", get(routes::health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http());

    let router = match request_timeout {
        Some(timeout) => router.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(timeout)),
        ),
        None => router,
    };

    router.with_state(state)
}

async fn not_found(uri: axum::http::Uri) -> ApiError {
    ApiError::not_found(format!("not found: {}", uri.path()))
}

async fn handle_timeout_error(err: tower::BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::timed_out("request timed out")
    } else {
        ApiError::internal(format!("unhandled middleware error: {err}"))
    }
}
