//! Queue configuration.

/// Redis Streams transport configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying task pointers
    pub stream_name: String,
    /// Consumer group shared by all workers
    pub consumer_group: String,
    /// Dead letter stream
    pub dlq_stream_name: String,
    /// Sorted set holding delayed requeues, scored by due time in ms
    pub delayed_set_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::named("processing_tasks")
    }
}

impl QueueConfig {
    /// Defaults derived from a stream name.
    pub fn named(stream: &str) -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: stream.to_string(),
            consumer_group: "mediaflow:workers".to_string(),
            dlq_stream_name: format!("{}:dlq", stream),
            delayed_set_name: format!("{}:delayed", stream),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let stream =
            std::env::var("QUEUE_STREAM").unwrap_or_else(|_| "processing_tasks".to_string());
        let defaults = Self::named(&stream);

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: defaults.stream_name,
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            delayed_set_name: std::env::var("QUEUE_DELAYED_SET")
                .unwrap_or(defaults.delayed_set_name),
        }
    }
}
