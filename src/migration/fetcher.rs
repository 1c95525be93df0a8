use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info};
use tokio::fs;
use uuid::Uuid;

use crate::cloud::SourceStore;
use crate::error::{MigrationError, StageResult};
use crate::migration::retry::RetryPolicy;

/// Downloads single objects into the staging tree.
pub struct ObjectFetcher {
    store: Arc<dyn SourceStore>,
    retry: RetryPolicy,
    timeout: Duration,
    partial_dir: PathBuf,
}

impl ObjectFetcher {
    /// `partial_dir` holds in-progress downloads. It must be on the same
    /// filesystem as the staging tree and outside of it.
    pub fn new(
        store: Arc<dyn SourceStore>,
        retry: RetryPolicy,
        timeout: Duration,
        partial_dir: impl Into<PathBuf>,
    ) -> Self {
        ObjectFetcher {
            store,
            retry,
            timeout,
            partial_dir: partial_dir.into(),
        }
    }

    fn partial_path(&self) -> PathBuf {
        self.partial_dir.join(Uuid::new_v4().to_string())
    }

    /// Fetch `bucket/key` to `destination`.
    ///
    /// Bytes land in a uniquely named file under the partial directory and
    /// are renamed into place once the download completes, so `destination`
    /// only ever holds a whole object and no key can alias another fetch's
    /// temporary file. Transfer failures and timeouts are retried per the
    /// policy.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Bytes written
    /// * `Err` - `ObjectNotFound`, `Transfer` (attempts exhausted), `LocalIo`
    ///   or `Authorization`
    pub async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> StageResult<u64> {
        let start = Instant::now();
        info!("Fetching {} -> {}", key, destination.display());

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MigrationError::local_io("create staging subdirectory", parent, e))?;
        }
        fs::create_dir_all(&self.partial_dir)
            .await
            .map_err(|e| MigrationError::local_io("create partial download directory", &self.partial_dir, e))?;

        let part = self.partial_path();
        let result = self
            .retry
            .run(key, |_| {
                let part = part.clone();
                async move {
                    let attempt = tokio::time::timeout(
                        self.timeout,
                        self.store.download(bucket, key, &part),
                    )
                    .await
                    .unwrap_or_else(|_| {
                        Err(MigrationError::transfer(format!(
                            "download of {} timed out after {:?}",
                            key, self.timeout
                        )))
                    });
                    if attempt.is_err() {
                        let _ = fs::remove_file(&part).await;
                    }
                    attempt
                }
            })
            .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to fetch {}: {}", key, e);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part, destination).await {
            let _ = fs::remove_file(&part).await;
            let err = MigrationError::local_io("commit staged object", destination, e);
            error!("Failed to fetch {}: {}", key, err);
            return Err(err);
        }

        info!("Fetched {} ({} bytes) in {:?}", key, bytes, start.elapsed());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeFailure, FakeStore};
    use tempfile::TempDir;

    fn fetcher(store: Arc<FakeStore>, dir: &TempDir) -> ObjectFetcher {
        ObjectFetcher::new(
            store,
            RetryPolicy::immediate(3),
            Duration::from_secs(5),
            dir.path().join("partial"),
        )
    }

    fn partial_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join("partial"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_fetch_writes_object() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::new("src").with_object("a/b.txt", b"hello"));
        let dest = dir.path().join("a/b.txt");

        let bytes = fetcher(store, &dir).fetch("src", "a/b.txt", &dest).await.unwrap();
        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert_eq!(partial_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FakeStore::new("src")
                .with_object("k.txt", b"data")
                .with_download_failure("k.txt", FakeFailure::Transfer, 2),
        );
        let dest = dir.path().join("k.txt");

        fetcher(store.clone(), &dir).fetch("src", "k.txt", &dest).await.unwrap();
        assert_eq!(store.downloads(), 3);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FakeStore::new("src")
                .with_object("k.txt", b"data")
                .with_download_failure("k.txt", FakeFailure::Transfer, 10),
        );
        let dest = dir.path().join("k.txt");

        let err = fetcher(store.clone(), &dir).fetch("src", "k.txt", &dest).await.unwrap_err();
        assert!(matches!(err, MigrationError::Transfer { .. }));
        assert_eq!(store.downloads(), 3);
        assert!(!dest.exists());
        assert_eq!(partial_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore::new("src"));
        let err = fetcher(store.clone(), &dir)
            .fetch("src", "gone.txt", &dir.path().join("gone.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ObjectNotFound { .. }));
        assert_eq!(store.downloads(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transfer_error() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FakeStore::new("src")
                .with_object("slow.txt", b"zzz")
                .with_download_delay(Duration::from_millis(200)),
        );
        let fetcher = ObjectFetcher::new(
            store.clone(),
            RetryPolicy::immediate(2),
            Duration::from_millis(20),
            dir.path().join("partial"),
        );

        let err = fetcher
            .fetch("src", "slow.txt", &dir.path().join("slow.txt"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.downloads(), 2);
    }

    #[tokio::test]
    async fn test_keys_sharing_a_suffix_do_not_share_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FakeStore::new("src")
                .with_object("x", b"first object")
                .with_object("x.part", b"second")
                .with_download_delay(Duration::from_millis(5)),
        );
        let object_fetcher = fetcher(store, &dir);
        let staging = dir.path().join("run");

        let dest_x = staging.join("x");
        let dest_part = staging.join("x.part");
        let (a, b) = tokio::join!(
            object_fetcher.fetch("src", "x", &dest_x),
            object_fetcher.fetch("src", "x.part", &dest_part),
        );
        assert_eq!(a.unwrap(), 12);
        assert_eq!(b.unwrap(), 6);
        assert_eq!(std::fs::read(staging.join("x")).unwrap(), b"first object");
        assert_eq!(std::fs::read(staging.join("x.part")).unwrap(), b"second");
        assert_eq!(partial_files(&dir), 0);
    }
}
