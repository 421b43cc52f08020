//! In-process object store
//!
//! Mirrors the behavior the gateway relies on from a real bucket: flat keys,
//! whole-object replacement, key-ordered prefix listings, and an end-of-range
//! error when reading past the end of an object. Every trait call is counted so
//! callers can assert that nothing reached the backend.

use super::{ObjectBody, ObjectInfo, ObjectReader, ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// Object store backed by a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a backend call
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                last_modified: Utc::now(),
            },
        );
    }

    /// Current content of `key`, if any
    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).map(|o| o.data.clone())
    }

    /// All stored keys in order
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Number of [`ObjectStore`] calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with a service error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn begin_call(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Service("service unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Box<dyn ObjectReader>> {
        self.begin_call()?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::new(MemoryReader {
            data: object.data.clone(),
        }))
    }

    async fn put(&self, key: &str, mut body: ObjectBody, size: Option<u64>) -> StorageResult<()> {
        self.begin_call()?;
        let mut data = Vec::with_capacity(size.unwrap_or(0).try_into().unwrap_or(0));
        body.read_to_end(&mut data).await?;
        self.insert(key, data).await;
        Ok(())
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.begin_call()?;
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|object| ObjectInfo {
                key: key.to_string(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.begin_call()?;
        // Deleting a missing key succeeds, as it does on S3
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.begin_call()?;
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }
}

/// Reader over a snapshot taken at open time
struct MemoryReader {
    data: Bytes,
}

#[async_trait]
impl ObjectReader for MemoryReader {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let start = usize::try_from(offset).map_err(|_| StorageError::EndOfRange)?;
        if start >= self.data.len() {
            return Err(StorageError::EndOfRange);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
