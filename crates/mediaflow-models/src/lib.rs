//! Shared data models for the mediaflow pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Media items and their processing status
//! - Processing tasks and their lifecycle
//! - Transport task pointers
//! - Deterministic object-store key derivation
//! - Clock and pipeline observer ports

pub mod clock;
pub mod keys;
pub mod media;
pub mod message;
pub mod observer;
pub mod task;

// Re-export common types
pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{original_key, output_key, STEP_RESIZE, STEP_THUMBNAIL};
pub use media::{Media, MediaId, MediaStatus};
pub use message::{MessageError, TaskMessage};
pub use observer::{NoopObserver, PipelineEvent, PipelineObserver, RecordingObserver};
pub use task::{NewTask, ParseStatusError, ProcessingTask, TaskId, TaskStatus};
