use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures_util::{StreamExt, TryStreamExt};
use log::{debug, warn};
use rusoto_core::{ByteStream, RusotoError};
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, GetObjectError, GetObjectRequest,
    HeadObjectError, HeadObjectRequest, ListObjectsV2Error, ListObjectsV2Request,
    PutObjectRequest, S3Client, UploadPartRequest, S3,
};
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::cloud::{DestinationStore, ListPage, RemoteObjectInfo, SourceStore, UploadRequest};
use crate::constants::{
    CHECKSUM_METADATA_KEY, LARGE_FILE_THRESHOLD, MULTIPART_CONCURRENCY, S3_LIST_PAGE_SIZE,
    S3_UPLOAD_CHUNK_SIZE as UPLOAD_CHUNK_SIZE,
};
use crate::error::{MigrationError, StageResult};
use crate::models::ObjectDescriptor;

/// Which end of the migration a request was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Destination,
}

fn unavailable(side: Side, message: String) -> MigrationError {
    match side {
        Side::Source => MigrationError::SourceUnavailable { message },
        Side::Destination => MigrationError::DestinationUnavailable { message },
    }
}

/// Map a rusoto failure onto the pipeline taxonomy.
///
/// Connection-level failures on data transfers are retryable; the same
/// failure while listing or resolving the store means it is unreachable.
fn classify<E: std::error::Error + 'static>(
    err: RusotoError<E>,
    side: Side,
    transfer: bool,
) -> MigrationError {
    match err {
        RusotoError::Credentials(e) => MigrationError::Authorization { message: e.to_string() },
        RusotoError::HttpDispatch(e) if transfer => MigrationError::transfer(e.to_string()),
        RusotoError::HttpDispatch(e) => unavailable(side, e.to_string()),
        RusotoError::Unknown(resp) => {
            classify_status(resp.status.as_u16(), resp.body_as_str(), side, transfer)
        }
        RusotoError::ParseError(msg) if transfer => MigrationError::transfer(msg),
        RusotoError::Blocking if transfer => MigrationError::transfer("request blocked"),
        other => unavailable(side, other.to_string()),
    }
}

fn classify_status(status: u16, body: &str, side: Side, transfer: bool) -> MigrationError {
    let message = format!("HTTP {}: {}", status, body);
    match status {
        401 | 403 => MigrationError::Authorization { message },
        500..=599 if transfer => MigrationError::transfer(message),
        _ => unavailable(side, message),
    }
}

/// Object store reached through the S3 API: AWS itself or any compatible
/// endpoint such as OCI's.
pub struct S3Store {
    client: Arc<S3Client>,
    namespace: Option<String>,
}

impl S3Store {
    pub fn new(client: Arc<S3Client>) -> Self {
        S3Store { client, namespace: None }
    }

    /// Attach the tenancy namespace reported by [`DestinationStore::resolve_namespace`].
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Upload a file with a single streamed PutObject
    async fn upload_small_file(&self, request: &UploadRequest) -> StageResult<()> {
        let file = AsyncFile::open(&request.source)
            .await
            .map_err(|e| MigrationError::local_io("open archive for upload", &request.source, e))?;
        let stream = FramedRead::new(file, BytesCodec::new()).map_ok(|chunk| chunk.freeze());

        let put = PutObjectRequest {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            body: Some(ByteStream::new_with_size(stream, request.size as usize)),
            content_length: Some(request.size as i64),
            metadata: checksum_metadata(request),
            ..Default::default()
        };

        self.client
            .put_object(put)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, Side::Destination, true))
    }

    /// Upload a large file using multipart upload
    async fn upload_large_file(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> StageResult<()> {
        let create_result = self
            .client
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                metadata: checksum_metadata(request),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, Side::Destination, true))?;

        let upload_id = create_result
            .upload_id
            .ok_or_else(|| MigrationError::transfer("no upload ID returned for multipart upload"))?;

        debug!("Started multipart upload {} for {}", upload_id, request.key);

        match self.upload_parts(request, &upload_id, cancel).await {
            Ok(parts) => {
                let complete = CompleteMultipartUploadRequest {
                    bucket: request.bucket.clone(),
                    key: request.key.clone(),
                    upload_id: upload_id.clone(),
                    multipart_upload: Some(CompletedMultipartUpload { parts: Some(parts) }),
                    ..Default::default()
                };
                self.client
                    .complete_multipart_upload(complete)
                    .await
                    .map(|_| ())
                    .map_err(|e| classify(e, Side::Destination, true))
            }
            Err(e) => {
                warn!("Aborting multipart upload {} for {}: {}", upload_id, request.key, e);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload(AbortMultipartUploadRequest {
                        bucket: request.bucket.clone(),
                        key: request.key.clone(),
                        upload_id: upload_id.clone(),
                        ..Default::default()
                    })
                    .await
                {
                    warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        request: &UploadRequest,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> StageResult<Vec<CompletedPart>> {
        let chunk = UPLOAD_CHUNK_SIZE as u64;
        let num_parts = (request.size + chunk - 1) / chunk;
        let mut completed_parts = Vec::with_capacity(num_parts as usize);

        for batch_start in (1..=num_parts).step_by(MULTIPART_CONCURRENCY) {
            if cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            let batch_end = std::cmp::min(batch_start + MULTIPART_CONCURRENCY as u64 - 1, num_parts);
            debug!("Uploading parts {} to {} of {}", batch_start, batch_end, num_parts);

            let batch = (batch_start..=batch_end).map(|part_number| {
                let start_byte = (part_number - 1) * chunk;
                let end_byte = std::cmp::min(part_number * chunk, request.size);
                self.upload_part(request, upload_id, part_number, start_byte, (end_byte - start_byte) as usize)
            });

            let results = tokio::select! {
                results = future::join_all(batch) => results,
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            };
            for result in results {
                completed_parts.push(result?);
            }
        }

        completed_parts.sort_by_key(|part| part.part_number.unwrap_or_default());
        Ok(completed_parts)
    }

    async fn upload_part(
        &self,
        request: &UploadRequest,
        upload_id: &str,
        part_number: u64,
        start_byte: u64,
        part_size: usize,
    ) -> StageResult<CompletedPart> {
        let read_err = |e| MigrationError::local_io("read archive part", &request.source, e);
        let mut file = AsyncFile::open(&request.source).await.map_err(read_err)?;
        file.seek(tokio::io::SeekFrom::Start(start_byte)).await.map_err(read_err)?;
        let mut buffer = vec![0u8; part_size];
        file.read_exact(&mut buffer).await.map_err(read_err)?;

        let output = self
            .client
            .upload_part(UploadPartRequest {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                upload_id: upload_id.to_string(),
                part_number: part_number as i64,
                content_length: Some(part_size as i64),
                body: Some(ByteStream::from(buffer)),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, Side::Destination, true))?;

        let e_tag = output
            .e_tag
            .ok_or_else(|| MigrationError::transfer(format!("no ETag for part {}", part_number)))?;

        Ok(CompletedPart {
            e_tag: Some(e_tag),
            part_number: Some(part_number as i64),
        })
    }
}

fn checksum_metadata(request: &UploadRequest) -> Option<HashMap<String, String>> {
    request.sha256.as_ref().map(|hash| {
        let mut metadata = HashMap::new();
        metadata.insert(CHECKSUM_METADATA_KEY.to_string(), hash.clone());
        metadata
    })
}

#[async_trait]
impl SourceStore for S3Store {
    fn describe(&self) -> String {
        "s3".to_string()
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StageResult<ListPage> {
        let request = ListObjectsV2Request {
            bucket: bucket.to_string(),
            prefix: if prefix.is_empty() { None } else { Some(prefix.to_string()) },
            continuation_token: continuation,
            max_keys: Some(S3_LIST_PAGE_SIZE),
            ..Default::default()
        };

        let output = self.client.list_objects_v2(request).await.map_err(|e| match e {
            RusotoError::Service(ListObjectsV2Error::NoSuchBucket(msg)) => {
                MigrationError::SourceUnavailable {
                    message: format!("bucket '{}' does not exist: {}", bucket, msg),
                }
            }
            other => classify(other, Side::Source, false),
        })?;

        let objects = output
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|obj| {
                let key = obj.key?;
                Some(ObjectDescriptor::new(key, obj.size.unwrap_or(0).max(0) as u64))
            })
            .collect();

        let next_token = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token
        } else {
            None
        };

        Ok(ListPage { objects, next_token })
    }

    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> StageResult<u64> {
        let output = self
            .client
            .get_object(GetObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                RusotoError::Service(GetObjectError::NoSuchKey(_)) => {
                    MigrationError::ObjectNotFound { key: key.to_string() }
                }
                RusotoError::Unknown(ref resp) if resp.status.as_u16() == 404 => {
                    MigrationError::ObjectNotFound { key: key.to_string() }
                }
                other => classify(other, Side::Source, true),
            })?;

        let expected = output.content_length.map(|len| len.max(0) as u64);
        let mut body = output
            .body
            .ok_or_else(|| MigrationError::transfer(format!("empty response body for {}", key)))?;

        let mut file = AsyncFile::create(destination)
            .await
            .map_err(|e| MigrationError::local_io("create staging file", destination, e))?;

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| MigrationError::transfer(format!("read of {} interrupted: {}", key, e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| MigrationError::local_io("write staging file", destination, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| MigrationError::local_io("flush staging file", destination, e))?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(MigrationError::transfer(format!(
                    "short read for {}: expected {} bytes, got {}",
                    key, expected, written
                )));
            }
        }

        Ok(written)
    }
}

#[async_trait]
impl DestinationStore for S3Store {
    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("s3-compatible (namespace {})", ns),
            None => "s3".to_string(),
        }
    }

    async fn resolve_namespace(&self) -> StageResult<Option<String>> {
        Ok(self.namespace.clone())
    }

    async fn upload(&self, request: &UploadRequest, cancel: &CancellationToken) -> StageResult<()> {
        if request.size > LARGE_FILE_THRESHOLD {
            self.upload_large_file(request, cancel).await
        } else {
            tokio::select! {
                res = self.upload_small_file(request) => res,
                _ = cancel.cancelled() => Err(MigrationError::Cancelled),
            }
        }
    }

    async fn stat(&self, bucket: &str, key: &str) -> StageResult<Option<RemoteObjectInfo>> {
        let result = self
            .client
            .head_object(HeadObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await;

        match result {
            Ok(output) => Ok(Some(RemoteObjectInfo {
                size: output.content_length.unwrap_or(0).max(0) as u64,
                sha256: output
                    .metadata
                    .and_then(|mut m| m.remove(CHECKSUM_METADATA_KEY)),
            })),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(None),
            Err(RusotoError::Unknown(ref resp)) if resp.status.as_u16() == 404 => Ok(None),
            Err(e) => Err(classify(e, Side::Destination, false)),
        }
    }
}
