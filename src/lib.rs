//! # taskq
//!
//! A broker-backed task service. Submissions are published to a message
//! broker (pgmq on Postgres), workers in any language report progress back
//! through status and result queues, and this service folds those events
//! into an in-memory projection that serves every read.
//!
//! The broker is the source of truth; the projection is a rebuildable cache.

pub mod api;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod model;
pub mod projection;
pub mod publisher;
pub mod server;
pub mod telemetry;
pub mod worker;
