//! Random-access reads over a backend object stream

use crate::Result;
use crate::storage::{ObjectReader, ObjectStore, StorageError};

/// Read handle for one object
///
/// Opening fetches the object, so a missing key fails here rather than on the
/// first READ. Reading at or past the end yields `Ok(0)`; every other backend
/// error is passed through.
pub struct ReadAdapter {
    key: String,
    reader: Box<dyn ObjectReader>,
}

impl ReadAdapter {
    /// Open `key` for reading
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileNotFound`] for a missing key and
    /// [`crate::Error::Backend`] for any other backend failure.
    pub async fn open(store: &dyn ObjectStore, key: &str) -> Result<Self> {
        let reader = store.get(key).await?;
        Ok(Self {
            key: key.to_string(),
            reader,
        })
    }

    /// Object key this handle reads
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read into `buf` from `offset`; `Ok(0)` at end of file
    ///
    /// # Errors
    ///
    /// Returns the backend error for anything other than end of range.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self.reader.read_at(buf, offset).await {
            Ok(n) => Ok(n),
            Err(StorageError::EndOfRange) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ReadAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadAdapter").field("key", &self.key).finish_non_exhaustive()
    }
}
