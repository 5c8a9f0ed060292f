//! Task transport and dispatch.
//!
//! This crate provides:
//! - The `Transport` port: publish, consume with manual acknowledgment,
//!   ack, nack with or without requeue, delayed requeue
//! - A Redis Streams implementation with consumer groups, a dead-letter
//!   stream and a delayed sorted set
//! - An in-memory implementation for tests
//! - `TaskDispatcher`: insert a task once per (media, step) and publish
//!   its pointer only when inserted
//! - `MetricsObserver`: pipeline outcomes as Prometheus counters

pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_transport;
pub mod transport;

pub use config::QueueConfig;
pub use dispatch::{DispatchOutcome, TaskDispatcher};
pub use error::{QueueError, QueueResult};
pub use memory::{InMemoryTransport, Settled};
pub use metrics::MetricsObserver;
pub use redis_transport::RedisTransport;
pub use transport::{Delivery, Transport};
