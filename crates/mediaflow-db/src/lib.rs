//! Relational task store and media repository.
//!
//! This crate provides:
//! - The `TaskStore` port with single-statement conditional writes
//! - The `MediaStore` port for media status bookkeeping
//! - A PostgreSQL implementation on sqlx with embedded migrations
//! - An in-memory implementation for tests and local runs

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use store::{MediaStore, TaskStore, DEFAULT_RETRY_BACKOFF};
