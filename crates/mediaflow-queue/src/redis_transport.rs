//! Transport over Redis Streams.
//!
//! Pointers are stream entries with a single `task` field, read through a
//! consumer group. Settlement:
//! - ack: `XACK` + `XDEL`
//! - nack with requeue: `XADD` a fresh entry, then ack the old one
//! - nack without requeue: `XADD` to the dead-letter stream, then ack
//! - delayed requeue: `ZADD` to a sorted set scored by due time; a promoter
//!   moves due members back with `XADD`

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::transport::{Delivery, Transport};

const BODY_FIELD: &str = "task";
const PROMOTE_BATCH: isize = 100;

/// Redis Streams transport.
pub struct RedisTransport {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisTransport {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the consumer group (and stream) if missing.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Dead-letter stream length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn delayed_member(body: &[u8]) -> String {
        format!("{}|{}", Uuid::new_v4(), String::from_utf8_lossy(body))
    }

    fn delayed_body(member: &str) -> &str {
        member.split_once('|').map(|(_, body)| body).unwrap_or(member)
    }
}

fn delivery_from(entry: &StreamId) -> Delivery {
    let body = match entry.map.get(BODY_FIELD) {
        Some(redis::Value::BulkString(bytes)) => bytes.clone(),
        Some(redis::Value::SimpleString(s)) => s.clone().into_bytes(),
        _ => {
            warn!(message_id = %entry.id, "Stream entry without task field");
            Vec::new()
        }
    };
    Delivery::new(entry.id.clone(), body)
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, body: &[u8]) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;

        debug!(message_id = %message_id, "Published task pointer");
        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(delivery_from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&delivery.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(message_id = %delivery.id, "Acknowledged");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool, reason: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if requeue {
            pipe.cmd("XADD")
                .arg(&self.config.stream_name)
                .arg("*")
                .arg(BODY_FIELD)
                .arg(&delivery.body)
                .ignore();
        } else {
            pipe.cmd("XADD")
                .arg(&self.config.dlq_stream_name)
                .arg("*")
                .arg(BODY_FIELD)
                .arg(&delivery.body)
                .arg("reason")
                .arg(reason)
                .arg("original_id")
                .arg(&delivery.id)
                .ignore();
        }
        pipe.cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&delivery.id)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        if requeue {
            debug!(message_id = %delivery.id, "Requeued");
        } else {
            warn!(message_id = %delivery.id, reason, "Dead-lettered");
        }
        Ok(())
    }

    async fn nack_delayed(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&self.config.delayed_set_name)
            .arg(due_ms)
            .arg(Self::delayed_member(&delivery.body))
            .ignore()
            .cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&delivery.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(message_id = %delivery.id, delay_ms = delay.as_millis() as u64, "Requeued with delay");
        Ok(())
    }

    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries: Vec<Delivery> = claimed.ids.iter().map(delivery_from).collect();
        if !deliveries.is_empty() {
            info!(count = deliveries.len(), consumer, "Reclaimed idle deliveries");
        }
        Ok(deliveries)
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(&self.config.delayed_set_name, "-inf", now_ms, 0, PROMOTE_BATCH)
            .await?;

        let mut promoted = 0;
        for member in due {
            // Only the worker whose ZREM wins republishes.
            let removed: i64 = conn.zrem(&self.config.delayed_set_name, &member).await?;
            if removed == 1 {
                redis::cmd("XADD")
                    .arg(&self.config.stream_name)
                    .arg("*")
                    .arg(BODY_FIELD)
                    .arg(Self::delayed_body(&member))
                    .query_async::<String>(&mut conn)
                    .await?;
                promoted += 1;
            }
        }

        if promoted > 0 {
            debug!(promoted, "Promoted delayed deliveries");
        }
        Ok(promoted)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
