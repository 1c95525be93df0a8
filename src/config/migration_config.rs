use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::{
    default_fetch_concurrency, DEFAULT_ARCHIVE_DIR, DEFAULT_ARCHIVE_NAME,
    DEFAULT_DESTINATION_PROFILE, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_SOURCE_PROFILE,
    DEFAULT_SOURCE_REGION, DEFAULT_STAGING_DIR, MAX_TRANSFER_ATTEMPTS, RETRY_BASE_DELAY_MS,
    RETRY_MAX_DELAY_MS,
};
use crate::utils::paths::{is_within, validate_file_name};

/// Backend serving the source bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceProvider {
    /// Amazon S3 or an S3-compatible endpoint
    S3,
    /// Directory tree on the local filesystem
    Local,
}

/// Backend receiving the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationProvider {
    /// Amazon S3 or an S3-compatible endpoint
    S3,
    /// Oracle Cloud Object Storage via its S3 compatibility API
    Oci,
    /// Directory tree on the local filesystem
    Local,
}

/// What to do when one object cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole job on the first terminal fetch failure
    #[default]
    FailFast,
    /// Record the key and keep going with the rest
    SkipAndContinue,
}

/// How object keys map onto staging file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StagingLayout {
    /// Keep the full key as a relative path
    #[default]
    PreservePaths,
    /// Flatten to the key's basename; colliding keys overwrite each other
    Basename,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub provider: SourceProvider,
    pub profile: String,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub endpoint: Option<String>,
    /// Root directory for the `local` provider.
    pub root: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            provider: SourceProvider::S3,
            profile: DEFAULT_SOURCE_PROFILE.to_string(),
            region: DEFAULT_SOURCE_REGION.to_string(),
            bucket: String::new(),
            prefix: String::new(),
            endpoint: None,
            root: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DestinationConfig {
    pub provider: DestinationProvider,
    pub profile: String,
    pub bucket: String,
    pub namespace: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Prepended to the archive name to form the destination key.
    pub object_prefix: Option<String>,
    /// Root directory for the `local` provider.
    pub root: Option<PathBuf>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        DestinationConfig {
            provider: DestinationProvider::Oci,
            profile: DEFAULT_DESTINATION_PROFILE.to_string(),
            bucket: String::new(),
            namespace: None,
            region: None,
            endpoint: None,
            object_prefix: None,
            root: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of the fetch worker pool.
    pub concurrency: usize,
    /// Attempts per transfer, including the first.
    pub max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            concurrency: default_fetch_concurrency(),
            max_attempts: MAX_TRANSFER_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RETRY_MAX_DELAY_MS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl TransferConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Complete description of one migration job.
///
/// Assembled once by [`crate::config::load_config`] and never mutated
/// after the pipeline starts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub staging_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_name: String,
    pub transfer: TransferConfig,
    pub failure_policy: FailurePolicy,
    pub staging_layout: StagingLayout,
    pub verify_upload: bool,
    pub cleanup_staging: bool,
    pub report_path: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            transfer: TransferConfig::default(),
            failure_policy: FailurePolicy::default(),
            staging_layout: StagingLayout::default(),
            verify_upload: true,
            cleanup_staging: false,
            report_path: None,
        }
    }
}

impl MigrationConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: MigrationConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Create a default configuration YAML file
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        MigrationConfig::default().save_to_yaml_file(path)
    }

    /// Final location of the archive.
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(&self.archive_name)
    }

    /// Key the archive is published under.
    pub fn destination_key(&self) -> String {
        match self.destination.object_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}", prefix.trim_end_matches('/'), self.archive_name)
            }
            _ => self.archive_name.clone(),
        }
    }

    /// Local directory that holds the listed source objects, if any.
    fn local_source_scope(&self) -> Option<PathBuf> {
        if self.source.provider != SourceProvider::Local {
            return None;
        }
        let root = self.source.root.as_ref()?;
        let bucket_dir = root.join(&self.source.bucket);
        // A prefix that doesn't end on a separator may still match sibling
        // names, so scope to its directory part.
        let dir_part = match self.source.prefix.rfind('/') {
            Some(idx) => &self.source.prefix[..idx],
            None => "",
        };
        Some(if dir_part.is_empty() { bucket_dir } else { bucket_dir.join(dir_part) })
    }

    /// Check the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.source.bucket.trim().is_empty() {
            bail!("Source bucket must be set");
        }
        if self.destination.bucket.trim().is_empty() {
            bail!("Destination bucket must be set");
        }

        validate_file_name(&self.archive_name).context("Invalid archive name")?;

        let archive_path = self.archive_path();
        if is_within(&archive_path, &self.staging_dir) {
            bail!(
                "Archive path {} lies inside the staging directory {}",
                archive_path.display(),
                self.staging_dir.display()
            );
        }

        if let Some(scope) = self.local_source_scope() {
            if is_within(&self.staging_dir, &scope) || is_within(&scope, &self.staging_dir) {
                bail!(
                    "Staging directory {} overlaps the source objects under {}",
                    self.staging_dir.display(),
                    scope.display()
                );
            }
            if is_within(&archive_path, &scope) {
                bail!(
                    "Archive path {} lies under the source objects in {}",
                    archive_path.display(),
                    scope.display()
                );
            }
        }

        if self.source.provider == SourceProvider::Local && self.source.root.is_none() {
            bail!("Local source provider requires source.root");
        }
        if self.destination.provider == DestinationProvider::Local && self.destination.root.is_none() {
            bail!("Local destination provider requires destination.root");
        }
        if self.destination.provider == DestinationProvider::Oci && self.destination.endpoint.is_none() {
            if self.destination.namespace.as_deref().map_or(true, str::is_empty) {
                bail!("OCI destination requires a namespace (or an explicit endpoint)");
            }
            if self.destination.region.as_deref().map_or(true, str::is_empty) {
                bail!("OCI destination requires a region (or an explicit endpoint)");
            }
        }

        if self.transfer.concurrency == 0 {
            bail!("Transfer concurrency must be at least 1");
        }
        if self.transfer.max_attempts == 0 {
            bail!("Transfer attempts must be at least 1");
        }
        if self.transfer.fetch_timeout_secs == 0 {
            bail!("Fetch timeout must be at least 1 second");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config() -> MigrationConfig {
        let mut config = MigrationConfig::default();
        config.source.bucket = "disbatch".to_string();
        config.destination.bucket = "DataMigration_BKT".to_string();
        config.destination.namespace = Some("tenancy".to_string());
        config.destination.region = Some("us-ashburn-1".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.source.profile, "default");
        assert_eq!(config.source.region, "us-east-1");
        assert_eq!(config.destination.profile, "DEFAULT");
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/aws_migration"));
        assert_eq!(config.archive_path(), PathBuf::from("/tmp/aws_archive.zip"));
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.staging_layout, StagingLayout::PreservePaths);
        assert_eq!(config.transfer.max_attempts, 3);
        assert!((4..=16).contains(&config.transfer.concurrency));
        assert!(config.verify_upload);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_buckets() {
        let mut config = valid_config();
        config.source.bucket.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.destination.bucket = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_archive_name_is_file_name() {
        let mut config = valid_config();
        config.archive_name = "nested/archive.zip".to_string();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid archive name"));
    }

    #[test]
    fn test_validate_archive_not_inside_staging() {
        let mut config = valid_config();
        config.staging_dir = PathBuf::from("/tmp/stage");
        config.archive_dir = PathBuf::from("/tmp/stage/out");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_local_source_aliasing() {
        let root = TempDir::new().unwrap();
        let mut config = valid_config();
        config.source.provider = SourceProvider::Local;
        config.source.root = Some(root.path().to_path_buf());
        config.source.prefix = "exports/".to_string();
        config.staging_dir = root.path().join("disbatch").join("exports").join("stage");
        assert!(config.validate().is_err());

        config.staging_dir = root.path().join("elsewhere");
        config.archive_dir = root.path().join("disbatch").join("exports");
        assert!(config.validate().is_err());

        config.archive_dir = root.path().join("out");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_oci_requires_namespace() {
        let mut config = valid_config();
        config.destination.namespace = None;
        assert!(config.validate().is_err());

        config.destination.endpoint = Some("https://objects.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_transfer_bounds() {
        let mut config = valid_config();
        config.transfer.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.transfer.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_destination_key() {
        let mut config = valid_config();
        assert_eq!(config.destination_key(), "aws_archive.zip");
        config.destination.object_prefix = Some("migrations/2024/".to_string());
        assert_eq!(config.destination_key(), "migrations/2024/aws_archive.zip");
    }

    #[test]
    fn test_yaml_partial_file_uses_defaults() {
        let yaml = r#"
source:
  bucket: disbatch
  prefix: logs/
destination:
  provider: local
  bucket: target
  root: /srv/objects
failure_policy: skip-and-continue
staging_layout: basename
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.source.bucket, "disbatch");
        assert_eq!(config.source.region, "us-east-1");
        assert_eq!(config.destination.provider, DestinationProvider::Local);
        assert_eq!(config.failure_policy, FailurePolicy::SkipAndContinue);
        assert_eq!(config.staging_layout, StagingLayout::Basename);
        assert_eq!(config.archive_name, "aws_archive.zip");
    }

    #[test]
    fn test_yaml_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migration.yaml");
        let config = valid_config();
        config.save_to_yaml_file(&path).unwrap();
        let loaded = MigrationConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
