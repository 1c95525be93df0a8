use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::cloud::{DestinationStore, UploadRequest};
use crate::error::{MigrationError, StageResult};
use crate::migration::retry::RetryPolicy;
use crate::models::{ArchiveArtifact, PublishReceipt};

/// Uploads the archive to the destination store and checks what landed.
pub struct DestinationPublisher {
    store: Arc<dyn DestinationStore>,
    retry: RetryPolicy,
    verify: bool,
}

impl DestinationPublisher {
    pub fn new(store: Arc<dyn DestinationStore>, retry: RetryPolicy, verify: bool) -> Self {
        DestinationPublisher { store, retry, verify }
    }

    /// Publish `artifact` as `bucket/object_name`.
    ///
    /// The local file is only read. With verification on, the stored
    /// object's size (and checksum, when the store reports one) must match
    /// the artifact or the publish fails with `Verification`.
    pub async fn publish(
        &self,
        artifact: &ArchiveArtifact,
        bucket: &str,
        object_name: &str,
        cancel: &CancellationToken,
    ) -> StageResult<PublishReceipt> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let start = Instant::now();
        let namespace = self.store.resolve_namespace().await?;
        info!(
            "Publishing {} ({} bytes) to {}/{} on {}",
            artifact.path.display(),
            artifact.size_bytes,
            bucket,
            object_name,
            self.store.describe()
        );

        let request = UploadRequest {
            bucket: bucket.to_string(),
            key: object_name.to_string(),
            source: artifact.path.clone(),
            size: artifact.size_bytes,
            sha256: Some(artifact.sha256.clone()),
        };

        self.retry
            .run(object_name, |_| self.store.upload(&request, cancel))
            .await?;

        if self.verify {
            self.verify_upload(artifact, bucket, object_name).await?;
        }

        info!(
            "Published {}/{} in {:?}{}",
            bucket,
            object_name,
            start.elapsed(),
            if self.verify { " (verified)" } else { "" }
        );

        Ok(PublishReceipt {
            bucket: bucket.to_string(),
            key: object_name.to_string(),
            namespace,
            bytes: artifact.size_bytes,
            verified: self.verify,
        })
    }

    async fn verify_upload(
        &self,
        artifact: &ArchiveArtifact,
        bucket: &str,
        object_name: &str,
    ) -> StageResult<()> {
        let mismatch = |detail: String| MigrationError::Verification {
            key: object_name.to_string(),
            detail,
        };

        let remote = self
            .store
            .stat(bucket, object_name)
            .await?
            .ok_or_else(|| mismatch("object not found after upload".to_string()))?;

        if remote.size != artifact.size_bytes {
            return Err(mismatch(format!(
                "size mismatch: local {} bytes, remote {} bytes",
                artifact.size_bytes, remote.size
            )));
        }

        match remote.sha256 {
            Some(ref remote_hash) if !remote_hash.eq_ignore_ascii_case(&artifact.sha256) => {
                Err(mismatch(format!(
                    "checksum mismatch: local {}, remote {}",
                    artifact.sha256, remote_hash
                )))
            }
            Some(_) => Ok(()),
            None => {
                debug!("{} does not report a checksum; verified size only", self.store.describe());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeFailure, FakeStore};
    use crate::utils::hash::calculate_sha256;
    use std::fs;
    use tempfile::TempDir;

    fn artifact(dir: &TempDir, body: &[u8]) -> ArchiveArtifact {
        let path = dir.path().join("archive.zip");
        fs::write(&path, body).unwrap();
        ArchiveArtifact {
            sha256: calculate_sha256(&path).unwrap(),
            path,
            size_bytes: body.len() as u64,
            entry_count: 1,
        }
    }

    fn publisher(store: Arc<FakeStore>, verify: bool) -> DestinationPublisher {
        DestinationPublisher::new(store, RetryPolicy::immediate(3), verify)
    }

    #[tokio::test]
    async fn test_publish_uploads_and_verifies() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir, b"archive bytes");
        let store = Arc::new(FakeStore::new("dest").with_namespace("tenancy"));

        let receipt = publisher(store.clone(), true)
            .publish(&artifact, "dest", "backups/archive.zip", &CancellationToken::new())
            .await
            .unwrap();

        assert!(receipt.verified);
        assert_eq!(receipt.namespace.as_deref(), Some("tenancy"));
        assert_eq!(store.uploaded("backups/archive.zip").unwrap(), b"archive bytes");
        assert_eq!(fs::read(&artifact.path).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn test_truncated_upload_fails_verification() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir, b"archive bytes");
        let store = Arc::new(FakeStore::new("dest").with_truncated_uploads());

        let err = publisher(store.clone(), true)
            .publish(&artifact, "dest", "archive.zip", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Verification { .. }));
        assert_eq!(store.uploads(), 1);

        let receipt = publisher(store, false)
            .publish(&artifact, "dest", "archive.zip", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!receipt.verified);
    }

    #[tokio::test]
    async fn test_transient_upload_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir, b"abc");
        let store = Arc::new(FakeStore::new("dest").with_upload_failure(FakeFailure::Transfer, 2));

        publisher(store.clone(), true)
            .publish(&artifact, "dest", "archive.zip", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.uploads(), 3);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_destination_unavailable() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir, b"abc");
        let store = Arc::new(FakeStore::new("dest"));

        let err = publisher(store.clone(), true)
            .publish(&artifact, "elsewhere", "archive.zip", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::DestinationUnavailable { .. }));
        assert_eq!(store.uploads(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_upload() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir, b"abc");
        let store = Arc::new(FakeStore::new("dest"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher(store.clone(), true)
            .publish(&artifact, "dest", "archive.zip", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
        assert_eq!(store.uploads(), 0);
    }
}
