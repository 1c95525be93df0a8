//! Error taxonomy for the migration pipeline.
//!
//! Every stage returns [`MigrationError`] so the orchestrator can record the
//! failing stage and cause without parsing strings. Only [`ErrorKind::Transfer`]
//! is retried locally; everything else propagates straight to the pipeline.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for pipeline components.
pub type StageResult<T> = Result<T, MigrationError>;

/// Flat classification of [`MigrationError`], used in reports and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    SourceUnavailable,
    DestinationUnavailable,
    ObjectNotFound,
    Transfer,
    LocalIo,
    ArchiveIo,
    Verification,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Authorization => "AuthorizationError",
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::DestinationUnavailable => "DestinationUnavailable",
            ErrorKind::ObjectNotFound => "ObjectNotFound",
            ErrorKind::Transfer => "TransferError",
            ErrorKind::LocalIo => "LocalIOError",
            ErrorKind::ArchiveIo => "ArchiveIOError",
            ErrorKind::Verification => "VerificationError",
            ErrorKind::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Errors produced by the listing, fetch, archive and publish stages.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Credentials missing, invalid or lacking permission.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Provider message.
        message: String,
    },
    /// Source store unreachable, or the bucket does not exist.
    #[error("source unavailable: {message}")]
    SourceUnavailable {
        /// Provider message.
        message: String,
    },
    /// Destination store unreachable, or the bucket does not exist.
    #[error("destination unavailable: {message}")]
    DestinationUnavailable {
        /// Provider message.
        message: String,
    },
    /// Object vanished between listing and fetch.
    #[error("object not found: {key}")]
    ObjectNotFound {
        /// Key that could not be fetched.
        key: String,
    },
    /// Network or partial transfer failure. Retryable.
    #[error("transfer failed: {message}")]
    Transfer {
        /// What went wrong.
        message: String,
    },
    /// Staging directory problems: unwritable, disk full, bad key mapping.
    #[error("local io failure during {operation} at {}: {source}", path.display())]
    LocalIo {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Read or write failure while producing the archive.
    #[error("archive failure during {operation} at {}: {message}", path.display())]
    ArchiveIo {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying cause.
        message: String,
    },
    /// Uploaded object does not match the local artifact.
    #[error("upload verification failed for {key}: {detail}")]
    Verification {
        /// Destination key.
        key: String,
        /// Mismatch description.
        detail: String,
    },
    /// External cancellation signal.
    #[error("cancelled")]
    Cancelled,
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Authorization { .. } => ErrorKind::Authorization,
            MigrationError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            MigrationError::DestinationUnavailable { .. } => ErrorKind::DestinationUnavailable,
            MigrationError::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            MigrationError::Transfer { .. } => ErrorKind::Transfer,
            MigrationError::LocalIo { .. } => ErrorKind::LocalIo,
            MigrationError::ArchiveIo { .. } => ErrorKind::ArchiveIo,
            MigrationError::Verification { .. } => ErrorKind::Verification,
            MigrationError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::Transfer { .. })
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        MigrationError::Transfer { message: message.into() }
    }

    pub fn local_io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        MigrationError::LocalIo {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn archive_io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        message: impl std::fmt::Display,
    ) -> Self {
        MigrationError::ArchiveIo {
            operation,
            path: path.into(),
            message: message.to_string(),
        }
    }
}
