//! Delivery settlement.

use std::time::Duration;

use mediaflow_queue::{Delivery, QueueResult, Transport};

use crate::config::Redelivery;

/// What to do with a delivery once processing is done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Remove the delivery
    Ack,
    /// Put the pointer back. `after` is how long it is pointless to see it
    /// again; only honoured in delayed redelivery mode.
    Requeue { after: Option<Duration> },
    /// Put the pointer back and withhold it for `after` in every redelivery
    /// mode. Used while this worker's own lease is still running.
    Hold { after: Duration },
    /// Terminal task failure: dead-letter with the reason
    DeadLetter(String),
    /// Undecodable body: dead-letter with the decode error
    Reject(String),
}

impl Settlement {
    /// Requeue with no hold-back.
    pub fn requeue() -> Self {
        Settlement::Requeue { after: None }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Requeue { .. } => "requeue",
            Settlement::Hold { .. } => "hold",
            Settlement::DeadLetter(_) => "dead_letter",
            Settlement::Reject(_) => "reject",
        }
    }

    /// Apply to `delivery` on `transport`.
    pub async fn apply(
        &self,
        transport: &dyn Transport,
        delivery: &Delivery,
        redelivery: Redelivery,
    ) -> QueueResult<()> {
        match self {
            Settlement::Ack => transport.ack(delivery).await,
            Settlement::Requeue { after } => match (redelivery, after) {
                (Redelivery::Delayed, Some(delay)) if !delay.is_zero() => {
                    transport.nack_delayed(delivery, *delay).await
                }
                _ => transport.nack(delivery, true, "requeue").await,
            },
            Settlement::Hold { after } if !after.is_zero() => {
                transport.nack_delayed(delivery, *after).await
            }
            Settlement::Hold { .. } => transport.nack(delivery, true, "requeue").await,
            Settlement::DeadLetter(reason) | Settlement::Reject(reason) => {
                transport.nack(delivery, false, reason).await
            }
        }
    }
}
