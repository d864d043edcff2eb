//! End-to-end tests over the in-memory broker: submit, work, project.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskq::broker::{Broker, InMemoryBroker, OutboundMessage, declare_queues};
use taskq::config::Config;
use taskq::consumer::Handled;
use taskq::error::Error;
use taskq::event::{EventQueue, ResultEvent, StatusEvent};
use taskq::model::{NewTask, TaskId, TaskStatus};
use taskq::projection::Applied;
use taskq::server::App;
use tokio_util::sync::CancellationToken;

fn test_config() -> Config {
    Config::from_lookup(|name| match name {
        "MESSAGING_URI" => Some("memory://".to_string()),
        "TASKQ_POLL_INTERVAL_MS" => Some("10".to_string()),
        "TASKQ_RECONNECT_DELAY_SECS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap()
}

/// Broker with declared queues and an app marked connected.
async fn harness() -> (Arc<InMemoryBroker>, App, Config) {
    let config = test_config();
    let broker = Arc::new(InMemoryBroker::new());
    declare_queues(broker.as_ref(), &config.queues).await.unwrap();
    let app = App::new(broker.clone(), &config);
    app.connection().set_connected(true);
    (broker, app, config)
}

async fn drain_events(app: &App) {
    app.consumer(EventQueue::Status).drain().await.unwrap();
    app.consumer(EventQueue::Results).drain().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_task_appears_once_queued_event_is_consumed() {
    let (broker, app, config) = harness().await;

    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "hi").unwrap())
        .await
        .unwrap();
    assert_eq!(submission.status, TaskStatus::Queued);

    // Submission never writes to the projection.
    assert!(app.projection().get(&submission.id).is_none());
    assert_eq!(broker.ready_count(&config.queues.work), 1);
    assert_eq!(broker.ready_count(&config.queues.status), 1);

    drain_events(&app).await;

    let task = app.projection().get(&submission.id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.task_type.as_deref(), Some("echo"));
    assert_eq!(task.payload.as_deref(), Some("hi"));
    assert_eq!(task.created_at, submission.created_at);
}

#[tokio::test]
async fn processing_then_result_shows_completed() {
    let (_broker, app, _config) = harness().await;
    let id = TaskId::parse("X").unwrap();

    app.publisher()
        .publish_status(&StatusEvent::new(id.clone(), TaskStatus::Processing).worker("node-worker"))
        .await
        .unwrap();
    app.publisher()
        .publish_result(&ResultEvent {
            id: id.clone(),
            worker: "node-worker".to_string(),
            result: json!({"answer": 42}),
            completed_at: None,
        })
        .await
        .unwrap();
    drain_events(&app).await;

    let task = app.projection().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"answer": 42})));
    assert_eq!(task.worker.as_deref(), Some("node-worker"));
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn error_status_is_projected() {
    let (_broker, app, _config) = harness().await;
    let id = TaskId::parse("Y").unwrap();

    app.publisher()
        .publish_status(&StatusEvent::new(id.clone(), TaskStatus::Error).error("boom"))
        .await
        .unwrap();
    drain_events(&app).await;

    let task = app.projection().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn unknown_type_is_skipped_by_the_worker() {
    let (_broker, app, _config) = harness().await;
    let submission = app
        .publisher()
        .submit(NewTask::new("mystery", "?").unwrap())
        .await
        .unwrap();

    let worker = app.worker("test-worker");
    assert!(worker.poll_once().await.unwrap().is_some());
    drain_events(&app).await;

    let task = app.projection().get(&submission.id).unwrap();
    assert_eq!(task.status, TaskStatus::Skipped);
    assert_eq!(task.worker.as_deref(), Some("test-worker"));
}

#[tokio::test]
async fn echo_task_runs_to_completion() {
    let (_broker, app, _config) = harness().await;
    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "hello").unwrap())
        .await
        .unwrap();

    app.worker("test-worker").poll_once().await.unwrap();
    drain_events(&app).await;

    let task = app.projection().get(&submission.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"echo": "hello"})));
    assert_eq!(task.payload.as_deref(), Some("hello"));
}

// ---------------------------------------------------------------------------
// Delivery policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn messages_are_acked_after_apply() {
    let (broker, app, config) = harness().await;
    app.publisher()
        .submit(NewTask::new("echo", "hi").unwrap())
        .await
        .unwrap();

    let handled = app
        .consumer(EventQueue::Status)
        .poll_once()
        .await
        .unwrap();
    assert_eq!(handled, Some(Handled::Applied(Applied::Inserted)));
    assert_eq!(broker.ready_count(&config.queues.status), 0);
    assert_eq!(broker.in_flight_count(&config.queues.status), 0);
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let (broker, app, config) = harness().await;
    let event = StatusEvent::new(TaskId::parse("dup").unwrap(), TaskStatus::Processing).worker("w");
    let body = serde_json::to_value(&event).unwrap();
    for _ in 0..2 {
        broker
            .publish(&config.queues.status, OutboundMessage::new(body.clone()))
            .await
            .unwrap();
    }

    let consumer = app.consumer(EventQueue::Status);
    assert_eq!(
        consumer.poll_once().await.unwrap(),
        Some(Handled::Applied(Applied::Inserted))
    );
    assert_eq!(
        consumer.poll_once().await.unwrap(),
        Some(Handled::Applied(Applied::Unchanged))
    );
    assert_eq!(app.projection().len(), 1);
}

#[tokio::test]
async fn malformed_messages_are_rejected_not_requeued() {
    let (broker, app, config) = harness().await;
    broker
        .publish(&config.queues.status, OutboundMessage::new(json!({"nope": 1})))
        .await
        .unwrap();
    broker
        .publish(&config.queues.results, OutboundMessage::new(json!("garbage")))
        .await
        .unwrap();

    assert_eq!(
        app.consumer(EventQueue::Status).poll_once().await.unwrap(),
        Some(Handled::Rejected)
    );
    assert_eq!(
        app.consumer(EventQueue::Results).poll_once().await.unwrap(),
        Some(Handled::Rejected)
    );

    assert!(app.projection().is_empty());
    assert_eq!(broker.archived(&config.queues.status).len(), 1);
    assert_eq!(broker.archived(&config.queues.results).len(), 1);
    assert_eq!(app.consumer(EventQueue::Status).drain().await.unwrap(), 0);
}

#[tokio::test]
async fn result_arriving_before_status_events_still_completes() {
    let (_broker, app, _config) = harness().await;
    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "hi").unwrap())
        .await
        .unwrap();
    app.worker("w").poll_once().await.unwrap();

    // Results first, then the queued + processing statuses.
    app.consumer(EventQueue::Results).drain().await.unwrap();
    assert_eq!(
        app.projection().get(&submission.id).unwrap().status,
        TaskStatus::Completed
    );
    app.consumer(EventQueue::Status).drain().await.unwrap();

    let task = app.projection().get(&submission.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.created_at, submission.created_at);
}

// ---------------------------------------------------------------------------
// Clear vs. broker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_does_not_touch_the_broker() {
    let (_broker, app, _config) = harness().await;
    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "again").unwrap())
        .await
        .unwrap();
    app.consumer(EventQueue::Status).drain().await.unwrap();
    assert_eq!(app.projection().clear(), 1);
    assert!(app.projection().get(&submission.id).is_none());

    // The task is still in flight on the broker; its terminal event brings it back.
    app.worker("w").poll_once().await.unwrap();
    drain_events(&app).await;

    let task = app.projection().get(&submission.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_fails_fast_while_disconnected() {
    let (broker, app, config) = harness().await;
    app.connection().set_connected(false);

    let err = app
        .publisher()
        .submit(NewTask::new("echo", "hi").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BrokerUnavailable(_)));
    assert_eq!(broker.ready_count(&config.queues.work), 0);
    assert_eq!(broker.ready_count(&config.queues.status), 0);
}

#[tokio::test]
async fn partial_publish_fails_the_submission() {
    let config = test_config();
    let broker = Arc::new(InMemoryBroker::new());
    // Only the status queue exists, so the work publish fails.
    broker.declare_queue(&config.queues.status).await.unwrap();
    let app = App::new(broker.clone(), &config);
    app.connection().set_connected(true);

    let result = app
        .publisher()
        .submit(NewTask::new("echo", "half").unwrap())
        .await;
    assert!(result.is_err());

    // The status event landed and is not taken back.
    assert_eq!(broker.ready_count(&config.queues.status), 1);
    assert_eq!(broker.ready_count(&config.queues.work), 0);
    // A query-level failure is not a lost connection.
    assert!(app.connection().is_connected());
}

#[tokio::test]
async fn broker_outage_loses_nothing() {
    let (broker, app, _config) = harness().await;
    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "hi").unwrap())
        .await
        .unwrap();

    broker.set_reachable(false);
    assert!(app.consumer(EventQueue::Status).poll_once().await.is_err());
    assert!(app.projection().is_empty());

    broker.set_reachable(true);
    drain_events(&app).await;
    assert!(app.projection().get(&submission.id).is_some());
}

#[tokio::test]
async fn background_loops_project_until_cancelled() {
    let config = test_config();
    let broker = Arc::new(InMemoryBroker::new());
    let app = App::new(broker.clone(), &config);

    let cancel = CancellationToken::new();
    let mut tasks = app.spawn_background(&cancel);
    tasks.push(tokio::spawn(app.worker("bg-worker").run(cancel.clone())));

    // The monitor declares the queues and flips the connection on.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !app.connection().is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let submission = app
        .publisher()
        .submit(NewTask::new("echo", "bg").unwrap())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = app.projection().get(&submission.id)
                && task.status == TaskStatus::Completed
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn monitor_reports_disconnect_and_recovery() {
    let config = test_config();
    let broker = Arc::new(InMemoryBroker::new());
    broker.set_reachable(false);
    let app = App::new(broker.clone(), &config);

    let cancel = CancellationToken::new();
    let tasks = app.spawn_background(&cancel);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!app.connection().is_connected());

    broker.set_reachable(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !app.connection().is_connected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn standalone_worker_runs_with_only_the_monitor() {
    let config = test_config();
    let broker = Arc::new(InMemoryBroker::new());
    let app = App::new(broker.clone(), &config);

    let cancel = CancellationToken::new();
    let tasks = [
        app.spawn_monitor(&cancel),
        tokio::spawn(app.worker("solo").run(cancel.clone())),
    ];

    tokio::time::timeout(Duration::from_secs(5), async {
        while !app.connection().is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    app.publisher()
        .submit(NewTask::new("echo", "solo").unwrap())
        .await
        .unwrap();

    // With no consumers running, the worker's result waits on the broker.
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.ready_count(&config.queues.results) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(app.projection().is_empty());
    assert_eq!(broker.ready_count(&config.queues.work), 0);

    cancel.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
