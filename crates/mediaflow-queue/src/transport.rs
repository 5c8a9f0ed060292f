//! Message transport port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// One delivered message awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned message id
    pub id: String,
    /// Raw pointer body, undecoded
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// At-least-once point-to-point delivery with manual acknowledgment.
///
/// Every delivery handed out by [`Transport::consume`] or
/// [`Transport::reclaim_idle`] must be settled exactly once by `ack`,
/// `nack` or `nack_delayed`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a pointer body; returns the message id.
    async fn publish(&self, body: &[u8]) -> QueueResult<String>;

    /// Wait up to `block` for at most `count` new deliveries.
    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Remove the message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Redeliver promptly when `requeue`, otherwise dead-letter with `reason`.
    async fn nack(&self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()>;

    /// Requeue, withholding redelivery for `delay`.
    async fn nack_delayed(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()>;

    /// Take over deliveries left unsettled for at least `min_idle`.
    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Move due delayed requeues back onto the stream; returns how many.
    async fn promote_due(&self) -> QueueResult<usize>;

    /// Connectivity probe.
    async fn ping(&self) -> QueueResult<()>;
}
