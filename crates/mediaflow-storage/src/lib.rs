//! Object store access for media artifacts.
//!
//! This crate provides:
//! - The `ObjectStore` port used by the worker and the API
//! - An S3-compatible client (MinIO, R2, S3) with presigned uploads
//! - An in-memory implementation for tests

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod store;

pub use client::S3ObjectStore;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryObjectStore;
pub use store::ObjectStore;
