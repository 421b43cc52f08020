//! Directory emulation over a flat key space
//!
//! Request paths become object keys by dropping one leading `/`. Directories
//! exist only as zero-length marker objects whose key ends in `/`, plus the
//! synthetic root, which is always present. Listings are flat: every key under
//! the prefix is returned, however deep it is.

use crate::reader::ReadAdapter;
use crate::storage::{ObjectInfo, ObjectStore, StorageError};
use crate::writer::StagedWrite;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// One entry of a listing or stat result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Last path component of the key
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Directory marker or root
    pub is_dir: bool,
}

impl DirEntry {
    /// The synthetic root entry
    pub fn root() -> Self {
        Self {
            name: "/".to_string(),
            size: 0,
            modified: Utc::now(),
            is_dir: true,
        }
    }

    /// Entry describing a stored object
    pub fn from_object(object: &ObjectInfo) -> Self {
        Self {
            name: base_name(&object.key),
            size: object.size,
            modified: object.last_modified,
            is_dir: object.key.ends_with('/'),
        }
    }
}

/// Object key for a request path
pub fn object_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Last component of `key`, ignoring trailing separators
///
/// Returns `.` for an empty key and `/` for a key made only of separators.
pub fn base_name(key: &str) -> String {
    if key.is_empty() {
        return ".".to_string();
    }
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// Canonical absolute form of a client path
///
/// Resolves `.` and `..` without touching storage and never climbs above `/`.
pub fn canonicalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Directory emulation for one bucket
#[derive(Clone)]
pub struct BucketNamespace {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for BucketNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketNamespace").finish_non_exhaustive()
    }
}

impl BucketNamespace {
    /// Wrap an object store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Every object under the directory at `path`, excluding its own marker
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the listing fails.
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let key = object_key(path);
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };

        let objects = self.store.list(&prefix).await?;
        let entries: Vec<DirEntry> = objects
            .iter()
            .filter(|object| object.key != prefix)
            .map(DirEntry::from_object)
            .collect();

        debug!(prefix = %prefix, entries = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Resolve `path` to the root, a file, or a directory marker
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] when neither the key nor its marker
    /// exists, or [`Error::Backend`] for any other backend failure.
    pub async fn stat(&self, path: &str) -> Result<DirEntry> {
        let key = object_key(path);
        if key.is_empty() {
            return Ok(DirEntry::root());
        }

        match self.store.stat(key).await {
            Ok(object) => return Ok(DirEntry::from_object(&object)),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let marker = format!("{key}/");
        match self.store.stat(&marker).await {
            Ok(object) => Ok(DirEntry::from_object(&object)),
            Err(StorageError::NotFound(_)) => Err(Error::FileNotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the directory marker for `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for the root and [`Error::Backend`] if
    /// the upload fails.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let marker = marker_key(path)?;
        self.store
            .put(&marker, Box::new(tokio::io::empty()), Some(0))
            .await?;
        Ok(())
    }

    /// Delete the directory marker for `path`; children are left in place
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for the root and [`Error::Backend`] if
    /// the delete fails.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let marker = marker_key(path)?;
        self.store.delete(&marker).await?;
        Ok(())
    }

    /// Delete the object at exactly the key for `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for the root and [`Error::Backend`] if
    /// the delete fails.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let key = object_key(path);
        if key.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        self.store.delete(key).await?;
        Ok(())
    }

    /// Open the object at `path` for reading
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] for a missing object.
    pub async fn open_read(&self, path: &str) -> Result<ReadAdapter> {
        ReadAdapter::open(self.store.as_ref(), object_key(path)).await
    }

    /// Start a staged upload to `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for the root and [`Error::Io`] if the
    /// staging file cannot be created.
    pub fn open_write(&self, path: &str) -> Result<StagedWrite> {
        let key = object_key(path);
        if key.is_empty() || key.ends_with('/') {
            return Err(Error::InvalidPath(path.to_string()));
        }
        StagedWrite::create(key)
    }

    /// Upload a staged write as its object
    ///
    /// # Errors
    ///
    /// Returns the upload error; the staging file is released either way.
    pub async fn commit(&self, handle: StagedWrite) -> Result<()> {
        handle.commit(self.store.as_ref()).await
    }
}

fn marker_key(path: &str) -> Result<String> {
    let key = object_key(path);
    if key.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(format!("{key}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_strips_one_slash() {
        assert_eq!(object_key("/docs/a.txt"), "docs/a.txt");
        assert_eq!(object_key("docs"), "docs");
        assert_eq!(object_key("/"), "");
        assert_eq!(object_key("//x"), "/x");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("docs/"), "docs");
        assert_eq!(base_name("docs/reports/q1.pdf"), "q1.pdf");
        assert_eq!(base_name("a.txt"), "a.txt");
        assert_eq!(base_name(""), ".");
        assert_eq!(base_name("//"), "/");
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("."), "/");
        assert_eq!(canonicalize(""), "/");
        assert_eq!(canonicalize("/docs/../photos/./1.jpg"), "/photos/1.jpg");
        assert_eq!(canonicalize("../../etc"), "/etc");
        assert_eq!(canonicalize("docs/"), "/docs");
    }
}
