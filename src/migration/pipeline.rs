use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cloud::{DestinationStore, SourceStore};
use crate::config::{FailurePolicy, MigrationConfig};
use crate::error::{MigrationError, StageResult};
use crate::migration::archiver::Archiver;
use crate::migration::fetcher::ObjectFetcher;
use crate::migration::lister::SourceLister;
use crate::migration::publisher::DestinationPublisher;
use crate::migration::retry::RetryPolicy;
use crate::migration::staging::StagingArea;
use crate::models::{
    ArchiveArtifact, FailedObject, MigrationResult, MigrationSummary, ObjectDescriptor,
    PipelineState, Stage,
};

/// Outcome of one object's fetch, sent from a worker to the aggregator.
struct FetchReport {
    key: String,
    result: StageResult<u64>,
}

/// Aggregated outcome of the Fetching stage.
#[derive(Default)]
struct FetchOutcome {
    fetched: usize,
    bytes: u64,
    failures: Vec<(String, MigrationError)>,
    aborted_by: Option<MigrationError>,
}

/// Drives one migration run: Listing, Fetching, Archiving, Publishing.
///
/// Each stage is a barrier. A failure in any stage moves the run to
/// `Failed(stage, cause)` and later stages are never started.
pub struct MigrationPipeline {
    config: MigrationConfig,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
    run_id: String,
    state: PipelineState,
    summary: MigrationSummary,
}

impl MigrationPipeline {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        let run_id = Uuid::new_v4().to_string();
        MigrationPipeline {
            config,
            source,
            destination,
            summary: MigrationSummary::new(run_id.clone()),
            run_id,
            state: PipelineState::Idle,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!("[{}] {} -> {}", self.run_id, self.state, next);
        self.state = next;
        self.summary.history.push(next);
    }

    fn finish(mut self) -> MigrationResult {
        self.transition(PipelineState::Done);
        self.summary.finished_at = Some(Utc::now());
        MigrationResult::Done(self.summary)
    }

    fn fail(mut self, stage: Stage, cause: MigrationError) -> MigrationResult {
        error!("[{}] {} stage failed: {}", self.run_id, stage, cause);
        self.transition(PipelineState::Failed {
            stage,
            cause: cause.kind(),
        });
        self.summary.finished_at = Some(Utc::now());
        MigrationResult::Failed {
            stage,
            cause,
            summary: self.summary,
        }
    }

    /// Execute the run to a terminal state.
    ///
    /// `cancel` may be raised at any time. During Fetching no new objects
    /// are dispatched once it fires and the run fails after in-flight
    /// fetches settle; during Archiving or Publishing the current stream
    /// is aborted and its temporary output discarded.
    pub async fn run(mut self, cancel: CancellationToken) -> MigrationResult {
        let start = Instant::now();
        info!(
            "[{}] Migrating {}/{} from {} to bucket {} on {}",
            self.run_id,
            self.config.source.bucket,
            self.config.source.prefix,
            self.source.describe(),
            self.config.destination.bucket,
            self.destination.describe()
        );

        // Listing
        self.transition(PipelineState::Running { stage: Stage::Listing });
        let lister = SourceLister::new(Arc::clone(&self.source));
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MigrationError::Cancelled),
            res = lister.list(&self.config.source.bucket, &self.config.source.prefix) => res,
        };
        let objects = match listed {
            Ok(objects) => objects,
            Err(e) => return self.fail(Stage::Listing, e),
        };
        self.summary.objects_listed = objects.len();

        if objects.is_empty() {
            info!("[{}] Nothing to migrate: no objects under the source prefix", self.run_id);
            self.summary.nothing_to_migrate = true;
            return self.finish();
        }

        // Fetching
        self.transition(PipelineState::Running { stage: Stage::Fetching });
        let staging = match StagingArea::create(
            &self.config.staging_dir,
            &self.run_id,
            self.config.staging_layout,
        ) {
            Ok(staging) => Arc::new(staging),
            Err(e) => return self.fail(Stage::Fetching, e),
        };

        let (work, collisions) = staging.partition_collisions(objects);
        self.summary.staging_collisions = collisions;

        let outcome = self.fetch_all(Arc::clone(&staging), work, &cancel).await;
        self.summary.objects_fetched = outcome.fetched;
        self.summary.bytes_fetched = outcome.bytes;
        if let Err(e) = staging.discard_partials() {
            warn!("[{}] Failed to remove partial downloads: {}", self.run_id, e);
        }

        if cancel.is_cancelled() {
            return self.fail(Stage::Fetching, MigrationError::Cancelled);
        }
        if let Some(cause) = outcome.aborted_by {
            return self.fail(Stage::Fetching, cause);
        }

        let mut first_cause = None;
        for (key, err) in outcome.failures {
            self.record_failure(&key, &err);
            first_cause.get_or_insert(err);
        }
        if outcome.fetched == 0 {
            let cause = first_cause.unwrap_or_else(|| MigrationError::transfer("no objects were fetched"));
            return self.fail(Stage::Fetching, cause);
        }

        // Archiving
        self.transition(PipelineState::Running { stage: Stage::Archiving });
        let archive_path = self.config.archive_path();
        let archiver = Archiver::with_cancellation(cancel.clone());
        let staging_root = staging.root().to_path_buf();
        let archived = tokio::task::spawn_blocking(move || archiver.archive(&staging_root, &archive_path))
            .await
            .unwrap_or_else(|e| {
                Err(MigrationError::archive_io(
                    "run archiver",
                    self.config.archive_path(),
                    e,
                ))
            });
        let artifact = match archived.and_then(|a| check_archive_complete(a, self.summary.objects_fetched)) {
            Ok(artifact) => artifact,
            Err(e) => return self.fail(Stage::Archiving, e),
        };
        self.summary.archive = Some(artifact.clone());

        // Publishing
        self.transition(PipelineState::Running { stage: Stage::Publishing });
        let publisher = DestinationPublisher::new(
            Arc::clone(&self.destination),
            RetryPolicy::from_config(&self.config.transfer),
            self.config.verify_upload,
        );
        let destination_key = self.config.destination_key();
        let receipt = match publisher
            .publish(&artifact, &self.config.destination.bucket, &destination_key, &cancel)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return self.fail(Stage::Publishing, e),
        };
        self.summary.published = Some(receipt);

        if self.config.cleanup_staging {
            if let Err(e) = staging.cleanup() {
                warn!("[{}] Failed to clean up staging: {}", self.run_id, e);
            }
        }

        info!("[{}] Migration finished in {:?}", self.run_id, start.elapsed());
        self.finish()
    }

    fn record_failure(&mut self, key: &str, err: &MigrationError) {
        warn!("[{}] Skipping {} after failure: {}", self.run_id, key, err);
        self.summary.failed_objects.push(FailedObject {
            key: key.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Fetch every object with a bounded pool of workers.
    ///
    /// Workers pull from a shared queue and report on a result channel.
    /// The stage completes only once every worker has exited, so every
    /// dispatched fetch has settled by the time this returns.
    async fn fetch_all(
        &self,
        staging: Arc<StagingArea>,
        objects: Vec<ObjectDescriptor>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let total = objects.len();
        let worker_count = self.config.transfer.concurrency.max(1).min(total.max(1));
        info!("[{}] Fetching {} objects with {} workers", self.run_id, total, worker_count);

        let (work_tx, work_rx) = mpsc::unbounded_channel::<ObjectDescriptor>();
        for object in objects {
            if work_tx.send(object).is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        // Stops dispatch on cancellation or on a fail-fast abort
        let stop = cancel.child_token();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<FetchReport>();

        let fetcher = Arc::new(ObjectFetcher::new(
            Arc::clone(&self.source),
            RetryPolicy::from_config(&self.config.transfer),
            self.config.transfer.fetch_timeout(),
            staging.partial_dir(),
        ));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let fetcher = Arc::clone(&fetcher);
            let staging = Arc::clone(&staging);
            let stop = stop.clone();
            let bucket = self.config.source.bucket.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    // Re-checked under the lock: waiting for it can span the stop signal
                    let next = {
                        let mut queue = work_rx.lock().await;
                        if stop.is_cancelled() {
                            None
                        } else {
                            queue.recv().await
                        }
                    };
                    let Some(object) = next else { break };

                    let result = match staging.local_path_for(&object.key) {
                        Ok(path) => fetcher.fetch(&bucket, &object.key, &path).await,
                        Err(e) => Err(e),
                    };
                    if result_tx.send(FetchReport { key: object.key, result }).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut outcome = FetchOutcome::default();
        let mut settled = 0usize;
        while let Some(report) = result_rx.recv().await {
            settled += 1;
            match report.result {
                Ok(bytes) => {
                    outcome.fetched += 1;
                    outcome.bytes += bytes;
                }
                Err(err) => match self.config.failure_policy {
                    FailurePolicy::FailFast => {
                        if outcome.aborted_by.is_none() {
                            warn!("[{}] Aborting fetch after failure of {}", self.run_id, report.key);
                            stop.cancel();
                            outcome.aborted_by = Some(err);
                        }
                    }
                    FailurePolicy::SkipAndContinue => outcome.failures.push((report.key, err)),
                },
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("[{}] Fetch worker exited abnormally: {}", self.run_id, e);
            }
        }

        info!(
            "[{}] Fetching settled: {} of {} dispatched objects fetched ({} bytes)",
            self.run_id, outcome.fetched, settled, outcome.bytes
        );
        outcome
    }
}

/// The archive must hold exactly one entry per fetched object.
fn check_archive_complete(artifact: ArchiveArtifact, fetched: usize) -> StageResult<ArchiveArtifact> {
    if artifact.entry_count != fetched {
        return Err(MigrationError::archive_io(
            "check entry count",
            artifact.path.clone(),
            format!("archive holds {} entries but {} objects were fetched", artifact.entry_count, fetched),
        ));
    }
    Ok(artifact)
}
