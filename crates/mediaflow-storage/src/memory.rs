//! In-memory object store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Object store held in process memory, with a fault switch for the
/// existence probe.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    exists_fails: AtomicBool,
    exists_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `exists` return an error until switched back.
    pub fn fail_exists(&self, fail: bool) {
        self.exists_fails.store(fail, Ordering::SeqCst);
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), (data, "application/octet-stream".to_string()));
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(_, ct)| ct.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.exists_fails.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("stat failed".to_string()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key))
    }

    async fn presign_put(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        Ok(format!("memory://put/{}?expires={}", key, expires_in.as_secs()))
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        Ok(format!("memory://get/{}?expires={}", key, expires_in.as_secs()))
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
