use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::MigrationConfig;
use crate::models::MigrationResult;

/// Create a JSON report of a migration run.
///
/// The report records where data came from and went to, the terminal
/// state, every failed key with its cause, and the state history.
///
/// # Arguments
///
/// * `hostname` - Host the run executed on
/// * `config` - Configuration the run used
/// * `result` - Terminal outcome of the run
///
/// # Example Output
///
/// ```json
/// {
///   "run_id": "550e8400-e29b-41d4-a716-446655440000",
///   "hostname": "migrator-01",
///   "state": { "state": "done" },
///   "success": true,
///   "source": { "bucket": "photos", "prefix": "2024/" },
///   "summary": { "objects_listed": 42, ... }
/// }
/// ```
pub fn create_run_report(
    hostname: &str,
    config: &MigrationConfig,
    result: &MigrationResult,
) -> Result<String> {
    let summary = result.summary();
    let cause = match result {
        MigrationResult::Failed { cause, .. } => Some(cause.to_string()),
        MigrationResult::Done(_) => None,
    };

    let report = json!({
        "run_id": summary.run_id,
        "hostname": hostname,
        "os": std::env::consts::OS,
        "migrator_version": env!("CARGO_PKG_VERSION"),
        "state": result.state(),
        "success": result.is_success(),
        "message": result.message(),
        "cause": cause,
        "source": {
            "provider": config.source.provider,
            "bucket": config.source.bucket,
            "prefix": config.source.prefix,
        },
        "destination": {
            "provider": config.destination.provider,
            "bucket": config.destination.bucket,
            "namespace": config.destination.namespace,
            "key": config.destination_key(),
        },
        "failure_policy": config.failure_policy,
        "staging_layout": config.staging_layout,
        "summary": summary,
    });

    serde_json::to_string_pretty(&report).context("Failed to serialize run report to JSON")
}

/// Write the run report to `path`, creating parent directories as needed.
pub fn write_run_report(
    path: &Path,
    hostname: &str,
    config: &MigrationConfig,
    result: &MigrationResult,
) -> Result<()> {
    let report = create_run_report(hostname, config, result)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    fs::write(path, report).with_context(|| format!("Failed to write run report to {}", path.display()))
}
