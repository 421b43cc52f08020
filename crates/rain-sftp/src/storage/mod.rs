//! Object storage client
//!
//! The gateway talks to its backend through [`ObjectStore`]: whole-object
//! uploads, streamed reads, metadata lookups, deletes and flat prefix listings.
//! [`S3Store`] is the production implementation; [`MemoryStore`] keeps objects
//! in process memory.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Upload body; read to the end by [`ObjectStore::put`]
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Storage failures
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// A ranged read started at or beyond the end of the object
    #[error("Requested range starts beyond the end of the object")]
    EndOfRange,

    /// The storage service rejected or failed the request
    #[error("Storage service error: {0}")]
    Service(String),

    /// Local I/O while feeding an upload
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object metadata as returned by stat and list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key
    pub key: String,
    /// Content length in bytes
    pub size: u64,
    /// Last modification time reported by the backend
    pub last_modified: DateTime<Utc>,
}

/// Flat, key-addressed object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a streaming read of the whole object
    async fn get(&self, key: &str) -> StorageResult<Box<dyn ObjectReader>>;

    /// Store `body` as the complete content of `key`.
    ///
    /// `size` may be `None`, in which case the body is streamed until EOF.
    async fn put(&self, key: &str, body: ObjectBody, size: Option<u64>) -> StorageResult<()>;

    /// Fetch metadata for exactly `key`
    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Delete exactly `key`
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Every object whose key starts with `prefix`, at any depth, in key order
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;
}

/// Random-access view of an object opened with [`ObjectStore::get`]
#[async_trait]
pub trait ObjectReader: Send {
    /// Read into `buf` starting at `offset`, returning the number of bytes read.
    ///
    /// Reading at or past the end of the object fails with
    /// [`StorageError::EndOfRange`].
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize>;
}
