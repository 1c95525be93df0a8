//! Test utilities for bucket_migrator
//!
//! This module provides common testing helpers and a scriptable in-memory
//! object store for exercising the pipeline without a network.

#![cfg(test)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::cloud::{DestinationStore, ListPage, RemoteObjectInfo, SourceStore, UploadRequest};
use crate::error::{MigrationError, StageResult};
use crate::models::ObjectDescriptor;

/// Creates a temporary directory that is automatically cleaned up
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a small staging-like tree in a temporary directory
pub fn create_test_file_structure() -> Result<TempDir> {
    let temp_dir = create_temp_dir()?;
    let base_path = temp_dir.path();

    fs::create_dir_all(base_path.join("dir1/subdir1"))?;
    fs::create_dir_all(base_path.join("dir2"))?;

    fs::write(base_path.join("file1.txt"), b"Test content 1")?;
    fs::write(base_path.join("file2.log"), b"Test log content")?;
    fs::write(base_path.join("dir1/file3.txt"), b"Test content 3")?;
    fs::write(base_path.join("dir1/subdir1/file4.txt"), b"Test content 4")?;
    fs::write(base_path.join("dir2/file5.log"), b"Another log file")?;

    Ok(temp_dir)
}

/// Failure a [`FakeStore`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Transfer,
    NotFound,
    Authorization,
    Unavailable,
}

impl FakeFailure {
    fn to_error(self, key: &str) -> MigrationError {
        match self {
            FakeFailure::Transfer => MigrationError::transfer(format!("connection reset reading {}", key)),
            FakeFailure::NotFound => MigrationError::ObjectNotFound { key: key.to_string() },
            FakeFailure::Authorization => MigrationError::Authorization {
                message: "access denied".to_string(),
            },
            FakeFailure::Unavailable => MigrationError::SourceUnavailable {
                message: "no such bucket".to_string(),
            },
        }
    }
}

struct Scripted {
    failure: FakeFailure,
    remaining: usize,
}

/// In-memory store implementing both store traits.
///
/// Objects live under a single bucket name. Listing pages are built from the
/// sorted object set unless explicit pages are supplied.
pub struct FakeStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pages: Option<Vec<Vec<ObjectDescriptor>>>,
    page_size: usize,
    list_failure: Option<FakeFailure>,
    download_failures: Mutex<HashMap<String, Scripted>>,
    upload_failures: Mutex<Option<Scripted>>,
    download_delay: Duration,
    truncate_uploads: bool,
    stuck_continuation: bool,
    namespace: Option<String>,
    uploaded: Mutex<BTreeMap<String, Vec<u8>>>,
    pub list_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeStore {
    pub fn new(bucket: &str) -> Self {
        FakeStore {
            bucket: bucket.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            pages: None,
            page_size: 1000,
            list_failure: None,
            download_failures: Mutex::new(HashMap::new()),
            upload_failures: Mutex::new(None),
            download_delay: Duration::ZERO,
            truncate_uploads: false,
            stuck_continuation: false,
            namespace: None,
            uploaded: Mutex::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_object(self, key: &str, body: &[u8]) -> Self {
        self.objects.lock().unwrap().insert(key.to_string(), body.to_vec());
        self
    }

    /// `count` objects named `prefix{i}.txt`.
    pub fn with_objects(mut self, prefix: &str, count: usize) -> Self {
        for i in 0..count {
            let key = format!("{}{}.txt", prefix, i);
            let body = format!("object body {}", i);
            self = self.with_object(&key, body.as_bytes());
        }
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Serve exactly these listing pages instead of paging the object set.
    pub fn with_pages(mut self, pages: Vec<Vec<ObjectDescriptor>>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn with_list_failure(mut self, failure: FakeFailure) -> Self {
        self.list_failure = Some(failure);
        self
    }

    /// Fail the next `times` downloads of `key`.
    pub fn with_download_failure(self, key: &str, failure: FakeFailure, times: usize) -> Self {
        self.download_failures.lock().unwrap().insert(
            key.to_string(),
            Scripted {
                failure,
                remaining: times,
            },
        );
        self
    }

    /// Fail the next `times` uploads.
    pub fn with_upload_failure(self, failure: FakeFailure, times: usize) -> Self {
        *self.upload_failures.lock().unwrap() = Some(Scripted {
            failure,
            remaining: times,
        });
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Store one byte less than was sent.
    pub fn with_truncated_uploads(mut self) -> Self {
        self.truncate_uploads = true;
        self
    }

    /// Answer every listing call with the same continuation token.
    pub fn with_stuck_continuation(mut self) -> Self {
        self.stuck_continuation = true;
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn uploaded(&self, key: &str) -> Option<Vec<u8>> {
        self.uploaded.lock().unwrap().get(key).cloned()
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn check_bucket(&self, bucket: &str) -> StageResult<()> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(MigrationError::SourceUnavailable {
                message: format!("bucket '{}' does not exist", bucket),
            })
        }
    }

    fn take_failure(slot: &mut Option<&mut Scripted>, key: &str) -> Option<MigrationError> {
        match slot {
            Some(scripted) if scripted.remaining > 0 => {
                scripted.remaining -= 1;
                Some(scripted.failure.to_error(key))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl SourceStore for FakeStore {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn list_page(
        &self,
        bucket: &str,
        _prefix: &str,
        continuation: Option<String>,
    ) -> StageResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.list_failure {
            return Err(failure.to_error(bucket));
        }
        self.check_bucket(bucket)?;

        let index: usize = continuation.as_deref().map(|t| t.parse().unwrap()).unwrap_or(0);
        let pages = match &self.pages {
            Some(pages) => pages.clone(),
            None => {
                let objects: Vec<ObjectDescriptor> = self
                    .objects
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| ObjectDescriptor::new(k.clone(), v.len() as u64))
                    .collect();
                objects.chunks(self.page_size).map(|c| c.to_vec()).collect()
            }
        };

        let objects = pages.get(index).cloned().unwrap_or_default();
        let next_token = if self.stuck_continuation {
            Some("0".to_string())
        } else if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(ListPage { objects, next_token })
    }

    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> StageResult<u64> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }

        let result = (|| -> StageResult<u64> {
            self.check_bucket(bucket)?;
            {
                let mut failures = self.download_failures.lock().unwrap();
                if let Some(err) = Self::take_failure(&mut failures.get_mut(key), key) {
                    return Err(err);
                }
            }
            let body = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| MigrationError::ObjectNotFound { key: key.to_string() })?;
            fs::write(destination, &body)
                .map_err(|e| MigrationError::local_io("write staging file", destination, e))?;
            Ok(body.len() as u64)
        })();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl DestinationStore for FakeStore {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn resolve_namespace(&self) -> StageResult<Option<String>> {
        Ok(self.namespace.clone())
    }

    async fn upload(&self, request: &UploadRequest, cancel: &CancellationToken) -> StageResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        if request.bucket != self.bucket {
            return Err(MigrationError::DestinationUnavailable {
                message: format!("bucket '{}' does not exist", request.bucket),
            });
        }
        {
            let mut failures = self.upload_failures.lock().unwrap();
            if let Some(err) = Self::take_failure(&mut failures.as_mut(), &request.key) {
                return Err(err);
            }
        }

        let mut body = fs::read(&request.source)
            .map_err(|e| MigrationError::local_io("read upload source", &request.source, e))?;
        if self.truncate_uploads {
            body.pop();
        }
        self.uploaded.lock().unwrap().insert(request.key.clone(), body);
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> StageResult<Option<RemoteObjectInfo>> {
        if bucket != self.bucket {
            return Ok(None);
        }
        Ok(self.uploaded.lock().unwrap().get(key).map(|body| RemoteObjectInfo {
            size: body.len() as u64,
            sha256: None,
        }))
    }
}
