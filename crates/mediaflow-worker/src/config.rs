//! Worker configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mediaflow_models::STEP_RESIZE;

/// How requeued deliveries come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Redelivery {
    /// Requeue promptly; the task store lease enforces the backoff
    #[default]
    Immediate,
    /// Requeue through the transport's delayed set until the lease is due
    Delayed,
}

impl fmt::Display for Redelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redelivery::Immediate => write!(f, "immediate"),
            Redelivery::Delayed => write!(f, "delayed"),
        }
    }
}

impl FromStr for Redelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Redelivery::Immediate),
            "delayed" => Ok(Redelivery::Delayed),
            other => Err(format!("unknown redelivery mode: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Claimant identity written to `lock_owner`
    pub worker_id: String,
    /// Lease granted by a successful claim
    pub lease: Duration,
    /// Total attempts before a task fails
    pub max_retries: u32,
    /// Backoff window written as a forward-dated lease on retry
    pub retry_backoff: Duration,
    /// Maximum in-flight deliveries
    pub prefetch: usize,
    /// Time box for one work unit invocation
    pub work_timeout: Duration,
    /// Requeue strategy
    pub redelivery: Redelivery,
    /// Blocking wait for new deliveries
    pub poll_block: Duration,
    /// How often idle deliveries of crashed consumers are reclaimed
    pub reclaim_interval: Duration,
    /// Idle time before a delivery can be reclaimed
    pub reclaim_min_idle: Duration,
    /// How often delayed requeues are promoted
    pub promote_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus exporter port
    pub metrics_port: u16,
    /// Ordered pipeline steps
    pub steps: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-unknown".to_string(),
            lease: Duration::from_secs(60),
            max_retries: 4,
            retry_backoff: Duration::from_secs(30),
            prefetch: 1,
            work_timeout: Duration::from_secs(45),
            redelivery: Redelivery::Immediate,
            poll_block: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(30),
            reclaim_min_idle: Duration::from_secs(120),
            promote_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: 9091,
            steps: vec![STEP_RESIZE.to_string()],
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Parse a comma-separated step list, dropping blanks.
pub fn parse_steps(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_id = std::env::var("WORKER_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let steps = std::env::var("PIPELINE_STEPS")
            .map(|raw| parse_steps(&raw))
            .ok()
            .filter(|steps| !steps.is_empty())
            .unwrap_or(defaults.steps);

        Self {
            worker_id,
            lease: env_secs("TASK_LEASE_SECONDS", defaults.lease),
            max_retries: env_parse("TASK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_backoff: env_secs("TASK_RETRY_BACKOFF_SECONDS", defaults.retry_backoff),
            prefetch: env_parse::<usize>("WORKER_PREFETCH")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.prefetch),
            work_timeout: env_secs("WORKER_WORK_TIMEOUT_SECONDS", defaults.work_timeout),
            redelivery: env_parse("WORKER_REDELIVERY").unwrap_or(defaults.redelivery),
            poll_block: Duration::from_millis(
                env_parse("WORKER_POLL_BLOCK_MS").unwrap_or(defaults.poll_block.as_millis() as u64),
            ),
            reclaim_interval: env_secs("WORKER_RECLAIM_INTERVAL_SECS", defaults.reclaim_interval),
            reclaim_min_idle: env_secs("WORKER_RECLAIM_MIN_IDLE_SECS", defaults.reclaim_min_idle),
            promote_interval: env_secs("WORKER_PROMOTE_INTERVAL_SECS", defaults.promote_interval),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            metrics_port: env_parse("WORKER_METRICS_PORT").unwrap_or(defaults.metrics_port),
            steps,
        }
    }
}
