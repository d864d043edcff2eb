//! In-process broker with the same delivery contract as pgmq.
//!
//! Queues must be declared before use. A received message is held in flight
//! until acked, rejected, or its visibility timeout lapses, after which it is
//! delivered again. Reachability can be toggled to exercise outage handling.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{Broker, Delivery, OutboundMessage};
use crate::error::{Error, Result};

#[derive(Default)]
struct MemoryQueue {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<i64, (Instant, Delivery)>,
    archived: Vec<Delivery>,
}

impl MemoryQueue {
    /// Return in-flight messages whose visibility timeout has lapsed.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .in_flight
            .iter()
            .filter(|(_, (visible_at, _))| *visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }
        for id in expired {
            if let Some((_, delivery)) = self.in_flight.remove(&id) {
                self.ready.push_back(delivery);
            }
        }
        self.ready.make_contiguous().sort_by_key(|d| d.msg_id);
    }
}

pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    next_id: AtomicI64,
    reachable: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining the broker. While unreachable every
    /// operation fails; queued messages are kept.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Messages waiting to be received.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages received but not yet acked or rejected.
    pub fn in_flight_count(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |q| q.in_flight.len())
    }

    /// Messages rejected as poison.
    pub fn archived(&self, queue: &str) -> Vec<Delivery> {
        self.queues
            .lock()
            .get(queue)
            .map(|q| q.archived.clone())
            .unwrap_or_default()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable(
                "in-memory broker is unreachable".to_string(),
            ))
        }
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut MemoryQueue) -> T) -> Result<T> {
        self.check_reachable()?;
        let mut queues = self.queues.lock();
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| Error::Other(format!("queue {queue} does not exist")))?;
        Ok(f(q))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn system(&self) -> &'static str {
        "memory"
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.check_reachable()?;
        self.queues.lock().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<i64> {
        let msg_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.with_queue(queue, |q| {
            q.ready.push_back(Delivery {
                msg_id,
                read_ct: 0,
                enqueued_at: Utc::now(),
                body: message.body,
                headers: message.headers,
            });
        })?;
        Ok(msg_id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Delivery>> {
        self.with_queue(queue, |q| {
            let now = Instant::now();
            q.requeue_expired(now);
            let mut delivery = q.ready.pop_front()?;
            delivery.read_ct += 1;
            q.in_flight
                .insert(delivery.msg_id, (now + visibility_timeout, delivery.clone()));
            Some(delivery)
        })
    }

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        self.with_queue(queue, |q| {
            q.in_flight.remove(&delivery.msg_id);
        })
    }

    async fn reject(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        self.with_queue(queue, |q| {
            if let Some((_, d)) = q.in_flight.remove(&delivery.msg_id) {
                q.archived.push(d);
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_receive_ack() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q").await.unwrap();

        broker
            .publish("q", OutboundMessage::new(json!({"n": 1})))
            .await
            .unwrap();
        let d = broker
            .receive("q", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(d.body, json!({"n": 1}));
        assert_eq!(d.read_ct, 1);
        assert_eq!(broker.in_flight_count("q"), 1);

        broker.ack("q", &d).await.unwrap();
        assert_eq!(broker.in_flight_count("q"), 0);
        assert!(
            broker
                .receive("q", Duration::from_secs(30))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unacked_message_reappears_after_visibility_timeout() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish("q", OutboundMessage::new(json!("x")))
            .await
            .unwrap();

        let first = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        let again = broker
            .receive("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.msg_id, again.msg_id);
        assert_eq!(again.read_ct, 2);
    }

    #[tokio::test]
    async fn reject_archives_instead_of_redelivering() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish("q", OutboundMessage::new(json!("bad")))
            .await
            .unwrap();

        let d = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        broker.reject("q", &d).await.unwrap();

        assert!(broker.receive("q", Duration::ZERO).await.unwrap().is_none());
        assert_eq!(broker.archived("q").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_broker_fails_but_keeps_messages() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker
            .publish("q", OutboundMessage::new(json!(1)))
            .await
            .unwrap();

        broker.set_reachable(false);
        assert!(broker.ping().await.is_err());
        assert!(broker.receive("q", Duration::ZERO).await.is_err());

        broker.set_reachable(true);
        assert!(broker.receive("q", Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn undeclared_queue_is_an_error() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish("missing", OutboundMessage::new(json!(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
