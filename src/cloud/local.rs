use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cloud::{DestinationStore, ListPage, RemoteObjectInfo, SourceStore, UploadRequest};
use crate::constants::S3_LIST_PAGE_SIZE;
use crate::error::{MigrationError, StageResult};
use crate::models::ObjectDescriptor;
use crate::utils::hash::calculate_sha256;
use crate::utils::paths::key_to_relative_path;

/// Sorted scan of one bucket and prefix, reused by follow-up pages.
#[derive(Debug)]
struct ListingSnapshot {
    bucket: String,
    prefix: String,
    objects: Arc<Vec<ObjectDescriptor>>,
}

/// Object store backed by a directory tree: `root/<bucket>/<key>`.
///
/// Listing pages are ordered by key and continue after the last key of the
/// previous page, like ListObjectsV2's `StartAfter`. The first page scans
/// the bucket; continuation pages read from that scan.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    page_size: usize,
    snapshot: Arc<Mutex<Option<ListingSnapshot>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore {
            root: root.into(),
            page_size: S3_LIST_PAGE_SIZE as usize,
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the listing page size (mainly to exercise pagination).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> StageResult<PathBuf> {
        let relative = key_to_relative_path(key).map_err(|reason| MigrationError::LocalIo {
            operation: "map object key",
            path: PathBuf::from(key),
            source: io::Error::new(io::ErrorKind::InvalidInput, reason),
        })?;
        Ok(self.bucket_dir(bucket).join(relative))
    }

    fn scan_bucket(bucket_dir: &Path, prefix: &str) -> io::Result<Vec<ObjectDescriptor>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(bucket_dir).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(bucket_dir) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                objects.push(ObjectDescriptor::new(key, entry.metadata().map_err(io::Error::from)?.len()));
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn cached_listing(&self, bucket: &str, prefix: &str) -> Option<Arc<Vec<ObjectDescriptor>>> {
        let guard = self.snapshot.lock().ok()?;
        guard
            .as_ref()
            .filter(|s| s.bucket == bucket && s.prefix == prefix)
            .map(|s| Arc::clone(&s.objects))
    }

    fn remember_listing(&self, bucket: &str, prefix: &str, objects: Arc<Vec<ObjectDescriptor>>) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = Some(ListingSnapshot {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                objects,
            });
        }
    }
}

fn classify_source_io(bucket: &str, err: io::Error) -> MigrationError {
    match err.kind() {
        io::ErrorKind::NotFound => MigrationError::SourceUnavailable {
            message: format!("bucket '{}' does not exist", bucket),
        },
        io::ErrorKind::PermissionDenied => MigrationError::Authorization {
            message: format!("access to bucket '{}' denied: {}", bucket, err),
        },
        _ => MigrationError::SourceUnavailable {
            message: format!("failed to list bucket '{}': {}", bucket, err),
        },
    }
}

#[async_trait]
impl SourceStore for LocalStore {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StageResult<ListPage> {
        let bucket_dir = self.bucket_dir(bucket);
        let metadata = fs::metadata(&bucket_dir)
            .await
            .map_err(|e| classify_source_io(bucket, e))?;
        if !metadata.is_dir() {
            return Err(MigrationError::SourceUnavailable {
                message: format!("bucket '{}' is not a directory", bucket),
            });
        }

        let cached = match continuation {
            Some(_) => self.cached_listing(bucket, prefix),
            None => None,
        };
        let objects = match cached {
            Some(objects) => objects,
            None => {
                let prefix_owned = prefix.to_string();
                let scan_dir = bucket_dir.clone();
                let scanned = tokio::task::spawn_blocking(move || Self::scan_bucket(&scan_dir, &prefix_owned))
                    .await
                    .map_err(|e| MigrationError::SourceUnavailable {
                        message: format!("listing task failed: {}", e),
                    })?
                    .map_err(|e| classify_source_io(bucket, e))?;
                let scanned = Arc::new(scanned);
                self.remember_listing(bucket, prefix, Arc::clone(&scanned));
                scanned
            }
        };

        let start = match continuation.as_deref() {
            Some(after) => objects.partition_point(|o| o.key.as_str() <= after),
            None => 0,
        };
        let remaining = &objects[start..];
        let has_more = remaining.len() > self.page_size;
        let page: Vec<ObjectDescriptor> = remaining.iter().take(self.page_size).cloned().collect();
        let next_token = if has_more { page.last().map(|o| o.key.clone()) } else { None };

        debug!("Listed {} objects from {} (more: {})", page.len(), bucket_dir.display(), has_more);
        Ok(ListPage { objects: page, next_token })
    }

    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> StageResult<u64> {
        let source_path = self.object_path(bucket, key)?;

        let mut source = match fs::File::open(&source_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MigrationError::ObjectNotFound { key: key.to_string() })
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(MigrationError::Authorization {
                    message: format!("cannot read {}: {}", key, e),
                })
            }
            Err(e) => return Err(MigrationError::transfer(format!("cannot open {}: {}", key, e))),
        };

        let mut target = fs::File::create(destination)
            .await
            .map_err(|e| MigrationError::local_io("create staging file", destination, e))?;

        let written = tokio::io::copy(&mut source, &mut target)
            .await
            .map_err(|e| MigrationError::transfer(format!("copy of {} interrupted: {}", key, e)))?;
        target
            .flush()
            .await
            .map_err(|e| MigrationError::local_io("flush staging file", destination, e))?;

        Ok(written)
    }
}

#[async_trait]
impl DestinationStore for LocalStore {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn resolve_namespace(&self) -> StageResult<Option<String>> {
        Ok(None)
    }

    async fn upload(&self, request: &UploadRequest, cancel: &CancellationToken) -> StageResult<()> {
        let bucket_dir = self.bucket_dir(&request.bucket);
        if !fs::metadata(&bucket_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(MigrationError::DestinationUnavailable {
                message: format!("bucket '{}' does not exist", request.bucket),
            });
        }

        let target = self.object_path(&request.bucket, &request.key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrationError::transfer(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let temp = target.with_file_name(format!(".upload-{}", Uuid::new_v4()));

        let copy = fs::copy(&request.source, &temp);
        let result = tokio::select! {
            res = copy => res.map_err(|e| MigrationError::transfer(format!("upload of {} failed: {}", request.key, e))),
            _ = cancel.cancelled() => Err(MigrationError::Cancelled),
        };

        match result {
            Ok(_) => fs::rename(&temp, &target).await.map_err(|e| {
                MigrationError::transfer(format!("cannot commit {}: {}", request.key, e))
            }),
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                Err(e)
            }
        }
    }

    async fn stat(&self, bucket: &str, key: &str) -> StageResult<Option<RemoteObjectInfo>> {
        let path = self.object_path(bucket, key)?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MigrationError::DestinationUnavailable {
                    message: format!("cannot stat {}: {}", key, e),
                })
            }
        };

        let hash_path = path.clone();
        let sha256 = tokio::task::spawn_blocking(move || calculate_sha256(&hash_path))
            .await
            .map_err(|e| MigrationError::transfer(format!("checksum task failed: {}", e)))?
            .map_err(|e| MigrationError::transfer(format!("cannot hash {}: {}", key, e)))?;

        Ok(Some(RemoteObjectInfo {
            size: metadata.len(),
            sha256: Some(sha256),
        }))
    }
}
