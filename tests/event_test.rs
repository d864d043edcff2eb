//! Wire-format tests: parsing, validation, and interop with other workers.

use chrono::{TimeZone, Utc};
use serde_json::json;
use taskq::error::Error;
use taskq::event::{EventQueue, QueueEvent, ResultEvent, StatusEvent, WorkMessage};
use taskq::model::{NewTask, TaskStatus};

#[test]
fn status_event_accepts_camel_case_fields() {
    let event = StatusEvent::parse(&json!({
        "id": "t1",
        "status": "queued",
        "type": "echo",
        "payload": "hi",
        "createdAt": "2030-01-02T03:04:05Z"
    }))
    .unwrap();

    assert_eq!(event.id.as_str(), "t1");
    assert_eq!(event.status, TaskStatus::Queued);
    assert_eq!(event.task_type.as_deref(), Some("echo"));
    assert_eq!(
        event.created_at,
        Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap())
    );
}

#[test]
fn status_event_from_python_worker_parses() {
    // taskId alias and an offset-less isoformat() timestamp
    let event = StatusEvent::parse(&json!({
        "taskId": "abc",
        "status": "skipped",
        "worker": "python-worker",
        "timestamp": "2030-01-02T03:04:05.123456",
        "reason": "not an analyze task"
    }))
    .unwrap();

    assert_eq!(event.id.as_str(), "abc");
    assert_eq!(event.status, TaskStatus::Skipped);
    assert_eq!(event.reason.as_deref(), Some("not an analyze task"));
    assert!(event.timestamp.is_some());
}

#[test]
fn unknown_status_is_malformed() {
    let err = StatusEvent::parse(&json!({"id": "t", "status": "exploded"})).unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn blank_id_is_malformed() {
    let err = StatusEvent::parse(&json!({"id": "  ", "status": "queued"})).unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn non_object_body_is_malformed() {
    assert!(StatusEvent::parse(&json!("queued")).is_err());
    assert!(ResultEvent::parse(&json!([1, 2, 3])).is_err());
    assert!(WorkMessage::parse(&json!(null)).is_err());
}

#[test]
fn bad_timestamp_is_malformed() {
    let err = StatusEvent::parse(&json!({
        "id": "t",
        "status": "queued",
        "createdAt": "yesterday"
    }))
    .unwrap_err();
    assert!(matches!(err, Error::MalformedMessage(_)));
}

#[test]
fn result_event_requires_worker_and_result() {
    assert!(ResultEvent::parse(&json!({"id": "t", "result": 1})).is_err());
    assert!(ResultEvent::parse(&json!({"id": "t", "worker": "w"})).is_err());
    assert!(ResultEvent::parse(&json!({"id": "t", "worker": " ", "result": 1})).is_err());

    let ok = ResultEvent::parse(&json!({
        "taskId": "t",
        "worker": "w",
        "result": {"rows": 3},
        "completedAt": "2030-01-02T03:04:05+02:00"
    }))
    .unwrap();
    assert_eq!(ok.result, json!({"rows": 3}));
    assert_eq!(
        ok.completed_at,
        Some(Utc.with_ymd_and_hms(2030, 1, 2, 1, 4, 5).unwrap())
    );
}

#[test]
fn work_message_accepts_data_alias() {
    let msg = WorkMessage::parse(&json!({"taskId": "t", "type": "analyze", "data": "a,b\n1,2"}))
        .unwrap();
    assert_eq!(msg.payload, "a,b\n1,2");
}

#[test]
fn work_message_serializes_spec_field_names() {
    let msg = WorkMessage::parse(&json!({"id": "t", "type": "echo", "payload": "hi"})).unwrap();
    assert_eq!(
        serde_json::to_value(&msg).unwrap(),
        json!({"id": "t", "type": "echo", "payload": "hi"})
    );
}

#[test]
fn queue_event_decodes_by_queue() {
    let body = json!({"id": "t", "worker": "w", "result": true});
    let event = QueueEvent::decode(EventQueue::Results, &body).unwrap();
    assert_eq!(event.status(), TaskStatus::Completed);
    assert_eq!(event.task_id().as_str(), "t");

    // The same body is not a valid status event.
    assert!(QueueEvent::decode(EventQueue::Status, &body).is_err());
}

#[test]
fn new_task_trims_type_but_keeps_payload() {
    let new = NewTask::new("  echo ", " hi ").unwrap();
    assert_eq!(new.task_type(), "echo");
    assert_eq!(new.payload(), " hi ");

    assert!(matches!(
        NewTask::new("echo", ""),
        Err(Error::InvalidInput(_))
    ));
}
