//! Staged whole-object writes
//!
//! SFTP clients write at arbitrary offsets, but an object can only be stored in
//! one piece. Writes land in a local temporary file; closing the handle uploads
//! that file as the complete object.

use crate::Result;
use crate::storage::ObjectStore;
use std::io::SeekFrom;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Prefix of staging file names
pub const STAGING_PREFIX: &str = "rainsftp";

/// An open write handle backed by a staging file
///
/// Dropping the handle without [`StagedWrite::commit`] discards the staged
/// bytes and removes the staging file.
#[derive(Debug)]
pub struct StagedWrite {
    key: String,
    file: File,
    path: TempPath,
}

impl StagedWrite {
    /// Create a staging file for an upload to `key`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the temporary file cannot be created.
    pub fn create(key: impl Into<String>) -> Result<Self> {
        let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempfile()?;
        let (file, path) = staging.into_parts();
        let key = key.into();
        debug!(key = %key, staging = %path.display(), "Opened staging file");
        Ok(Self {
            key,
            file: File::from_std(file),
            path,
        })
    }

    /// Object key the handle will be committed to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write `data` at `offset`; skipped ranges read back as zeros
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] on staging file failure.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    /// Upload the staged content as the whole object and release the staging
    /// file. The file is released whether or not the upload succeeds.
    ///
    /// # Errors
    ///
    /// Returns the upload error, or a staging file error from before the
    /// upload started.
    pub async fn commit(self, store: &dyn ObjectStore) -> Result<()> {
        let Self {
            key,
            mut file,
            path,
        } = self;

        let uploaded = async {
            file.flush().await?;
            file.seek(SeekFrom::Start(0)).await?;
            store.put(&key, Box::new(file), None).await?;
            Ok::<(), crate::Error>(())
        }
        .await;

        let staging = path.display().to_string();
        if let Err(e) = path.close() {
            warn!(key = %key, staging = %staging, error = %e, "Failed to delete staging file");
        }

        if uploaded.is_ok() {
            debug!(key = %key, "Committed staged object");
        }
        uploaded
    }
}
