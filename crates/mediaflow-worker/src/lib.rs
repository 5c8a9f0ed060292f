//! Media pipeline worker.
//!
//! This crate provides:
//! - Lease-based task claiming over the relational task store
//! - Idempotent execution of pluggable work units
//! - Bounded retries with backoff and dead-lettering
//! - Pipeline chaining to the next step or media completion
//! - A concurrency-limited executor over the pointer transport

pub mod claim;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod settlement;
pub mod units;
pub mod work;

pub use claim::{route_claim_failure, ClaimRoute};
pub use config::{Redelivery, WorkerConfig};
pub use error::{WorkError, WorkerError, WorkerResult};
pub use executor::{handle_delivery, TaskExecutor};
pub use logging::TaskLogger;
pub use pipeline::{NextStep, Pipeline, PipelineAdvancer};
pub use processor::{ProcessorSettings, TaskProcessor};
pub use retry::{Disposition, RetryPolicy};
pub use settlement::Settlement;
pub use units::{builtin_registry, FitImage};
pub use work::{WorkRegistry, WorkUnit};
