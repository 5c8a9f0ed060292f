//! Object store port.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Blob storage addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(false)` only when the store positively reports the key absent.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Time-limited URL a client can PUT the object to.
    async fn presign_put(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Time-limited URL a client can GET the object from.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Connectivity probe.
    async fn ping(&self) -> StorageResult<()>;
}
