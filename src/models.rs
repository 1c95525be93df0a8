use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MigrationError};

/// One object reported by a source listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        ObjectDescriptor { key: key.into(), size }
    }
}

/// The archive produced from a staging tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub entry_count: usize,
    pub sha256: String,
}

/// Where the archive ended up.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub bucket: String,
    pub key: String,
    pub namespace: Option<String>,
    pub bytes: u64,
    pub verified: bool,
}

/// Pipeline stages, in execution order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Listing,
    Fetching,
    Archiving,
    Publishing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Listing => write!(f, "Listing"),
            Stage::Fetching => write!(f, "Fetching"),
            Stage::Archiving => write!(f, "Archiving"),
            Stage::Publishing => write!(f, "Publishing"),
        }
    }
}

/// Orchestration state machine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    Idle,
    Running { stage: Stage },
    Done,
    Failed { stage: Stage, cause: ErrorKind },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Running { stage } => write!(f, "{}", stage),
            PipelineState::Done => write!(f, "Done"),
            PipelineState::Failed { stage, cause } => write!(f, "Failed({}, {})", stage, cause),
        }
    }
}

/// A key that could not be fetched under skip-and-continue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedObject {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything known about a run, whatever its outcome.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MigrationSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub objects_listed: usize,
    pub objects_fetched: usize,
    pub bytes_fetched: u64,
    pub failed_objects: Vec<FailedObject>,
    pub staging_collisions: Vec<String>,
    pub nothing_to_migrate: bool,
    pub archive: Option<ArchiveArtifact>,
    pub published: Option<PublishReceipt>,
    pub history: Vec<PipelineState>,
}

impl MigrationSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        MigrationSummary {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            objects_listed: 0,
            objects_fetched: 0,
            bytes_fetched: 0,
            failed_objects: Vec::new(),
            staging_collisions: Vec::new(),
            nothing_to_migrate: false,
            archive: None,
            published: None,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed_objects.iter().map(|f| f.key.as_str()).collect()
    }
}

/// Terminal outcome of a pipeline run.
#[derive(Debug)]
pub enum MigrationResult {
    Done(MigrationSummary),
    Failed {
        stage: Stage,
        cause: MigrationError,
        summary: MigrationSummary,
    },
}

impl MigrationResult {
    pub fn summary(&self) -> &MigrationSummary {
        match self {
            MigrationResult::Done(summary) => summary,
            MigrationResult::Failed { summary, .. } => summary,
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            MigrationResult::Done(_) => PipelineState::Done,
            MigrationResult::Failed { stage, cause, .. } => PipelineState::Failed {
                stage: *stage,
                cause: cause.kind(),
            },
        }
    }

    /// `Done` with every listed object carried into the archive.
    pub fn is_success(&self) -> bool {
        match self {
            MigrationResult::Done(summary) => summary.failed_objects.is_empty(),
            MigrationResult::Failed { .. } => false,
        }
    }

    /// Process exit code: 0 only for a complete success.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// One-line human description for the terminal.
    pub fn message(&self) -> String {
        match self {
            MigrationResult::Done(summary) if summary.nothing_to_migrate => {
                "Nothing to migrate: source listing returned no objects".to_string()
            }
            MigrationResult::Done(summary) => {
                let target = summary
                    .published
                    .as_ref()
                    .map(|p| format!("{}/{}", p.bucket, p.key))
                    .unwrap_or_else(|| "destination".to_string());
                if summary.failed_objects.is_empty() {
                    format!(
                        "Data migration completed successfully: {} objects archived to {}",
                        summary.objects_fetched, target
                    )
                } else {
                    format!(
                        "Data migration completed with {} failed objects ({} archived to {}): {}",
                        summary.failed_objects.len(),
                        summary.objects_fetched,
                        target,
                        summary.failed_keys().join(", ")
                    )
                }
            }
            MigrationResult::Failed { stage, cause, .. } => {
                format!("Migration failed during {} ({}): {}", stage, cause.kind(), cause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_no_failed_objects() {
        let mut summary = MigrationSummary::new("run");
        assert!(MigrationResult::Done(summary.clone()).is_success());

        summary.failed_objects.push(FailedObject {
            key: "a/b.txt".to_string(),
            kind: ErrorKind::ObjectNotFound,
            message: "gone".to_string(),
        });
        let result = MigrationResult::Done(summary);
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), 1);
        assert!(result.message().contains("a/b.txt"));
    }

    #[test]
    fn test_failed_state_carries_stage_and_cause() {
        let result = MigrationResult::Failed {
            stage: Stage::Archiving,
            cause: MigrationError::archive_io("write", "/tmp/a.zip", "disk full"),
            summary: MigrationSummary::new("run"),
        };
        assert_eq!(
            result.state(),
            PipelineState::Failed {
                stage: Stage::Archiving,
                cause: ErrorKind::ArchiveIo
            }
        );
        assert_eq!(result.exit_code(), 1);
        assert!(result.message().contains("Archiving"));
        assert!(result.message().contains("ArchiveIOError"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "Idle");
        assert_eq!(PipelineState::Running { stage: Stage::Fetching }.to_string(), "Fetching");
        assert_eq!(
            PipelineState::Failed {
                stage: Stage::Fetching,
                cause: ErrorKind::Cancelled
            }
            .to_string(),
            "Failed(Fetching, Cancelled)"
        );
        assert!(PipelineState::Done.is_terminal());
        assert!(!PipelineState::Running { stage: Stage::Listing }.is_terminal());
    }

    #[test]
    fn test_nothing_to_migrate_message() {
        let mut summary = MigrationSummary::new("run");
        summary.nothing_to_migrate = true;
        let result = MigrationResult::Done(summary);
        assert!(result.is_success());
        assert!(result.message().starts_with("Nothing to migrate"));
    }
}
