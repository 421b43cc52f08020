//! S3-compatible object store
//!
//! Talks to any S3 API endpoint (AWS, MinIO, Ceph RGW) with static credentials
//! and path-style addressing. Uploads of unknown length are streamed as
//! multipart uploads; objects smaller than one part go up in a single request.

use super::{ObjectBody, ObjectInfo, ObjectReader, ObjectStore, StorageError, StorageResult};
use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, Config as S3Config};
use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Multipart part size; S3 requires at least 5 MiB for all but the last part
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 backend bound to one bucket
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client for the configured endpoint.
    ///
    /// No request is made; see [`S3Store::check_bucket`].
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "rain-sftp",
        );

        let endpoint = config.endpoint_url();
        debug!(endpoint = %endpoint, region = %config.region, "Building S3 client");

        let s3_config = S3Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .behavior_version(BehaviorVersion::latest())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    /// Verify that the service is reachable and the bucket exists
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Service`] when the bucket cannot be reached.
    pub async fn check_bucket(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        info!(bucket = %self.bucket, "Storage bucket reachable");
        Ok(())
    }

    async fn put_single(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| service_error(&e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        first_part: Vec<u8>,
        body: &mut ObjectBody,
    ) -> StorageResult<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::Service("multipart upload id missing".into()))?
            .to_string();

        match self.upload_parts(key, &upload_id, first_part, body).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| service_error(&e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        body: &mut ObjectBody,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut chunk = first_part;
        let mut part_number = 1;

        while !chunk.is_empty() {
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            part_number += 1;
            chunk = read_part(body).await?;
        }

        debug!(key, parts = parts.len(), "Uploaded multipart object");
        Ok(parts)
    }

    async fn open_range(&self, key: &str, offset: u64) -> StorageResult<ByteStream> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if offset > 0 {
            request = request.range(format!("bytes={offset}-"));
        }

        match request.send().await {
            Ok(output) => Ok(output.body),
            Err(err) => {
                let service = err.as_service_error();
                if service.is_some_and(aws_sdk_s3::operation::get_object::GetObjectError::is_no_such_key) {
                    Err(StorageError::NotFound(key.to_string()))
                } else if service.and_then(ProvideErrorMetadata::code) == Some("InvalidRange") {
                    Err(StorageError::EndOfRange)
                } else {
                    Err(service_error(&err))
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> StorageResult<Box<dyn ObjectReader>> {
        let body = self.open_range(key, 0).await?;
        Ok(Box::new(S3ObjectReader {
            store: self.clone(),
            key: key.to_string(),
            cursor: StreamCursor::new(body),
        }))
    }

    async fn put(&self, key: &str, mut body: ObjectBody, size: Option<u64>) -> StorageResult<()> {
        let first = read_part(&mut body).await?;
        if first.len() < PART_SIZE {
            debug!(key, size = ?size, bytes = first.len(), "Uploading object in one request");
            return self.put_single(key, first).await;
        }
        self.put_multipart(key, first, &mut body).await
    }

    async fn stat(&self, key: &str) -> StorageResult<ObjectInfo> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(ObjectInfo {
                key: key.to_string(),
                size: output
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok())
                    .unwrap_or(0),
                last_modified: output
                    .last_modified()
                    .map(to_chrono)
                    .unwrap_or_default(),
            }),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found)
                    || err
                        .raw_response()
                        .is_some_and(|response| response.status().as_u16() == 404);
                if not_found {
                    Err(StorageError::NotFound(key.to_string()))
                } else {
                    Err(service_error(&err))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| service_error(&e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix((!prefix.is_empty()).then(|| prefix.to_string()))
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| service_error(&e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object
                        .size()
                        .and_then(|len| u64::try_from(len).ok())
                        .unwrap_or(0),
                    last_modified: object.last_modified().map(to_chrono).unwrap_or_default(),
                });
            }
        }

        Ok(objects)
    }
}

/// Streamed reader that follows sequential reads and re-requests on seeks
struct S3ObjectReader {
    store: S3Store,
    key: String,
    cursor: StreamCursor<ByteStream>,
}

#[async_trait]
impl ObjectReader for S3ObjectReader {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        if self.cursor.needs_reopen(offset) {
            debug!(key = %self.key, from = self.cursor.position, to = offset, "Re-opening object at offset");
            self.cursor.invalidate();
            let body = self.store.open_range(&self.key, offset).await?;
            self.cursor.reset(body, offset);
        }
        self.cursor.fill(buf).await
    }
}

/// Chunked response body
#[async_trait]
trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Option<StorageResult<Bytes>>;
}

#[async_trait]
impl ChunkSource for ByteStream {
    async fn next_chunk(&mut self) -> Option<StorageResult<Bytes>> {
        self.next()
            .await
            .map(|chunk| chunk.map_err(|e| StorageError::Service(e.to_string())))
    }
}

/// Position-tracking state over one open body.
///
/// After a failed chunk the body is discarded and the position stays at the
/// start of the failed read, so a retry at that offset re-opens the object.
struct StreamCursor<S> {
    body: Option<S>,
    buffered: Bytes,
    position: u64,
    exhausted: bool,
}

impl<S: ChunkSource> StreamCursor<S> {
    const fn new(body: S) -> Self {
        Self {
            body: Some(body),
            buffered: Bytes::new(),
            position: 0,
            exhausted: false,
        }
    }

    fn needs_reopen(&self, offset: u64) -> bool {
        offset != self.position || (self.body.is_none() && !self.exhausted)
    }

    fn invalidate(&mut self) {
        self.body = None;
        self.buffered = Bytes::new();
        self.exhausted = false;
    }

    fn reset(&mut self, body: S, offset: u64) {
        self.body = Some(body);
        self.buffered = Bytes::new();
        self.exhausted = false;
        self.position = offset;
    }

    async fn fill(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.buffered.is_empty() {
                let Some(body) = self.body.as_mut() else { break };
                match body.next_chunk().await {
                    Some(Ok(chunk)) => self.buffered = chunk,
                    Some(Err(e)) => {
                        self.invalidate();
                        return Err(e);
                    }
                    None => {
                        self.body = None;
                        self.exhausted = true;
                    }
                }
                continue;
            }

            let n = (buf.len() - filled).min(self.buffered.len());
            buf[filled..filled + n].copy_from_slice(&self.buffered[..n]);
            self.buffered.advance(n);
            filled += n;
        }

        self.position += filled as u64;
        if filled == 0 && !buf.is_empty() {
            return Err(StorageError::EndOfRange);
        }
        Ok(filled)
    }
}

/// Read up to one part from the body; shorter only at EOF
async fn read_part(body: &mut ObjectBody) -> StorageResult<Vec<u8>> {
    let mut part = Vec::new();
    AsyncReadExt::take(&mut *body, PART_SIZE as u64)
        .read_to_end(&mut part)
        .await?;
    Ok(part)
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

fn service_error<E: std::error::Error>(err: &E) -> StorageError {
    StorageError::Service(DisplayErrorContext(err).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_part_stops_at_eof() {
        let mut body: ObjectBody = Box::new(&b"short body"[..]);
        let part = read_part(&mut body).await.unwrap();
        assert_eq!(part, b"short body");

        let rest = read_part(&mut body).await.unwrap();
        assert!(rest.is_empty());
        assert!(rest.capacity() < PART_SIZE);
    }

    /// Scripted body: yields the queued chunks in order, then ends
    struct ScriptedBody(std::collections::VecDeque<StorageResult<Bytes>>);

    impl ScriptedBody {
        fn new(chunks: Vec<StorageResult<Bytes>>) -> Self {
            Self(chunks.into())
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedBody {
        async fn next_chunk(&mut self) -> Option<StorageResult<Bytes>> {
            self.0.pop_front()
        }
    }

    #[tokio::test]
    async fn test_cursor_sequential_reads() {
        let mut cursor = StreamCursor::new(ScriptedBody::new(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));

        let mut buf = [0u8; 4];
        assert_eq!(cursor.fill(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert!(!cursor.needs_reopen(4));

        let mut buf = [0u8; 16];
        let n = cursor.fill(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"o world");
        assert!(!cursor.needs_reopen(11));
        assert!(matches!(
            cursor.fill(&mut buf).await,
            Err(StorageError::EndOfRange)
        ));
    }

    #[tokio::test]
    async fn test_cursor_reopens_after_failed_chunk() {
        let mut cursor = StreamCursor::new(ScriptedBody::new(vec![
            Ok(Bytes::from_static(b"hello ")),
            Err(StorageError::Service("connection reset".into())),
            Ok(Bytes::from_static(b"stale")),
        ]));

        let mut buf = [0u8; 11];
        assert!(matches!(
            cursor.fill(&mut buf).await,
            Err(StorageError::Service(_))
        ));

        // A retry at the same offset must not continue the broken body
        assert!(cursor.needs_reopen(0));
        cursor.reset(
            ScriptedBody::new(vec![Ok(Bytes::from_static(b"hello world"))]),
            0,
        );
        let n = cursor.fill(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[test]
    fn test_to_chrono() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&dt).timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_client_construction_makes_no_request() {
        let config = StorageConfig {
            endpoint: "localhost:9000".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            bucket: "uploads".to_string(),
            secure: false,
            region: "us-east-1".to_string(),
        };

        let store = S3Store::new(&config);
        assert_eq!(store.bucket, "uploads");
    }
}
