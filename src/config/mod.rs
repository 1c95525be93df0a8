//! Migration configuration.
//!
//! One loading path with a fixed precedence: explicit command-line values
//! override `MIGRATE_*` environment variables, which override the YAML
//! file, which overrides the built-in defaults.

mod env_vars;
mod migration_config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use log::info;

pub use env_vars::{apply_env_overrides, expand_config_paths, expand_path_vars, parse_unix_env_vars};
pub use migration_config::{
    DestinationConfig, DestinationProvider, FailurePolicy, MigrationConfig, SourceConfig,
    SourceProvider, StagingLayout, TransferConfig,
};

/// Values supplied explicitly on the command line.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub source_provider: Option<SourceProvider>,
    pub source_profile: Option<String>,
    pub source_region: Option<String>,
    pub source_bucket: Option<String>,
    pub source_prefix: Option<String>,
    pub source_endpoint: Option<String>,
    pub source_root: Option<PathBuf>,
    pub dest_provider: Option<DestinationProvider>,
    pub dest_profile: Option<String>,
    pub dest_bucket: Option<String>,
    pub dest_namespace: Option<String>,
    pub dest_region: Option<String>,
    pub dest_endpoint: Option<String>,
    pub dest_prefix: Option<String>,
    pub dest_root: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub archive_name: Option<String>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    pub staging_layout: Option<StagingLayout>,
    pub no_verify: bool,
    pub cleanup_staging: bool,
    pub report_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Overlay every value that was provided.
    pub fn apply(&self, config: &mut MigrationConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut config.source.provider, &self.source_provider);
        set(&mut config.source.profile, &self.source_profile);
        set(&mut config.source.region, &self.source_region);
        set(&mut config.source.bucket, &self.source_bucket);
        set(&mut config.source.prefix, &self.source_prefix);
        set_opt(&mut config.source.endpoint, &self.source_endpoint);
        set_opt(&mut config.source.root, &self.source_root);

        set(&mut config.destination.provider, &self.dest_provider);
        set(&mut config.destination.profile, &self.dest_profile);
        set(&mut config.destination.bucket, &self.dest_bucket);
        set_opt(&mut config.destination.namespace, &self.dest_namespace);
        set_opt(&mut config.destination.region, &self.dest_region);
        set_opt(&mut config.destination.endpoint, &self.dest_endpoint);
        set_opt(&mut config.destination.object_prefix, &self.dest_prefix);
        set_opt(&mut config.destination.root, &self.dest_root);

        set(&mut config.staging_dir, &self.staging_dir);
        set(&mut config.archive_dir, &self.archive_dir);
        set(&mut config.archive_name, &self.archive_name);
        set(&mut config.transfer.concurrency, &self.concurrency);
        set(&mut config.transfer.max_attempts, &self.max_attempts);
        set(&mut config.failure_policy, &self.failure_policy);
        set(&mut config.staging_layout, &self.staging_layout);
        set_opt(&mut config.report_path, &self.report_path);

        if self.no_verify {
            config.verify_upload = false;
        }
        if self.cleanup_staging {
            config.cleanup_staging = true;
        }
    }
}

/// Build the finished configuration for a run.
///
/// # Arguments
///
/// * `config_path` - Optional YAML file; it must exist when given
/// * `overrides` - Explicit command-line values
/// * `env_lookup` - Environment accessor, normally `std::env::var(..).ok()`
///
/// # Returns
///
/// * `Ok(MigrationConfig)` - Merged and validated configuration
/// * `Err` - If the file can't be parsed or the result is invalid
pub fn load_config<F>(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
    env_lookup: F,
) -> Result<MigrationConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match config_path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            info!("Loading configuration from {}", path.display());
            MigrationConfig::from_yaml_file(path)?
        }
        None => MigrationConfig::default(),
    };

    apply_env_overrides(&mut config, env_lookup)?;
    overrides.apply(&mut config);
    expand_config_paths(&mut config);
    config.validate()?;

    Ok(config)
}
