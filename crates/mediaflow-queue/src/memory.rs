//! In-memory transport.
//!
//! Models the delivery semantics the engine relies on: a ready queue, an
//! in-flight set awaiting settlement, a dead-letter list and delayed
//! requeues released by [`Transport::promote_due`] against an injected
//! clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaflow_models::{Clock, SystemClock};
use tokio::sync::Notify;

use crate::error::{QueueError, QueueResult};
use crate::transport::{Delivery, Transport};

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Acked,
    Requeued,
    Delayed(Duration),
    DeadLettered(String),
}

struct InFlight {
    delivery: Delivery,
    consumer: String,
    delivered_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, InFlight>,
    delayed: Vec<(DateTime<Utc>, Vec<u8>)>,
    dead: Vec<(Delivery, String)>,
    log: Vec<(String, Settled)>,
    published: usize,
}

/// Transport held in process memory.
pub struct InMemoryTransport {
    state: Mutex<State>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            clock,
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make publish and consume fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Enqueue a raw body, bypassing publish accounting.
    pub fn inject(&self, body: impl Into<Vec<u8>>) -> String {
        let id = self.new_id();
        self.lock().ready.push_back(Delivery::new(id.clone(), body));
        self.notify.notify_one();
        id
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Consumer currently holding an in-flight delivery.
    pub fn holder(&self, message_id: &str) -> Option<String> {
        self.lock()
            .in_flight
            .get(message_id)
            .map(|f| f.consumer.clone())
    }

    /// Number of successful `publish` calls.
    pub fn published(&self) -> usize {
        self.lock().published
    }

    pub fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.lock().dead.clone()
    }

    /// Settlements in the order they happened, keyed by message id.
    pub fn settlements(&self) -> Vec<(String, Settled)> {
        self.lock().log.clone()
    }

    /// Bodies currently waiting for delivery.
    pub fn ready_bodies(&self) -> Vec<Vec<u8>> {
        self.lock().ready.iter().map(|d| d.body.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory transport switched off".to_string()));
        }
        Ok(())
    }

    fn take_in_flight(&self, state: &mut State, delivery: &Delivery) -> QueueResult<()> {
        state
            .in_flight
            .remove(&delivery.id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.clone()))
    }

    fn pop_ready(&self, consumer: &str, count: usize) -> Vec<Delivery> {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut out = Vec::new();
        while out.len() < count {
            let Some(delivery) = state.ready.pop_front() else {
                break;
            };
            state.in_flight.insert(
                delivery.id.clone(),
                InFlight {
                    delivery: delivery.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
            out.push(delivery);
        }
        out
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, body: &[u8]) -> QueueResult<String> {
        self.check()?;
        let id = self.new_id();
        {
            let mut state = self.lock();
            state.ready.push_back(Delivery::new(id.clone(), body));
            state.published += 1;
        }
        self.notify.notify_one();
        Ok(id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        self.check()?;
        let got = self.pop_ready(consumer, count);
        if !got.is_empty() || block.is_zero() {
            return Ok(got);
        }
        let _ = tokio::time::timeout(block, self.notify.notified()).await;
        Ok(self.pop_ready(consumer, count))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.lock();
        self.take_in_flight(&mut state, delivery)?;
        state.log.push((delivery.id.clone(), Settled::Acked));
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()> {
        {
            let mut state = self.lock();
            self.take_in_flight(&mut state, delivery)?;
            if requeue {
                let id = self.new_id();
                state
                    .ready
                    .push_back(Delivery::new(id, delivery.body.clone()));
                state.log.push((delivery.id.clone(), Settled::Requeued));
            } else {
                state.dead.push((delivery.clone(), reason.to_string()));
                state
                    .log
                    .push((delivery.id.clone(), Settled::DeadLettered(reason.to_string())));
            }
        }
        if requeue {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn nack_delayed(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let due = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let mut state = self.lock();
        self.take_in_flight(&mut state, delivery)?;
        state.delayed.push((due, delivery.body.clone()));
        state.log.push((delivery.id.clone(), Settled::Delayed(delay)));
        Ok(())
    }

    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        self.check()?;
        let now = self.clock.now();
        let min_idle = chrono::Duration::from_std(min_idle).unwrap_or(chrono::Duration::zero());
        let mut state = self.lock();

        let mut ids: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, f)| now - f.delivered_at >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.truncate(count);

        let mut out = Vec::new();
        for id in ids {
            if let Some(entry) = state.in_flight.get_mut(&id) {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                out.push(entry.delivery.clone());
            }
        }
        Ok(out)
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let now = self.clock.now();
        let promoted = {
            let mut state = self.lock();
            let (due, waiting): (Vec<_>, Vec<_>) =
                state.delayed.drain(..).partition(|(at, _)| *at <= now);
            state.delayed = waiting;
            for (_, body) in &due {
                let id = self.new_id();
                state.ready.push_back(Delivery::new(id, body.clone()));
            }
            due.len()
        };
        if promoted > 0 {
            self.notify.notify_one();
        }
        Ok(promoted)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check()
    }
}
