use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConfigOverrides, DestinationProvider, FailurePolicy, SourceProvider, StagingLayout};

/// Command-line arguments for the bucket migrator.
///
/// Every migration option is optional here; anything left unset falls back
/// to `MIGRATE_*` environment variables, then the YAML file given with
/// `--config`, then the built-in defaults.
#[derive(Parser, Debug)]
#[clap(
    name = "bucket-migrator",
    version,
    about = "Archive a bucket prefix and publish it to another object store"
)]
pub struct Args {
    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Source provider (s3, local)
    #[clap(long)]
    pub source_provider: Option<SourceProvider>,

    /// Credential profile for the source store
    #[clap(long)]
    pub source_profile: Option<String>,

    /// Region of the source bucket
    #[clap(long)]
    pub source_region: Option<String>,

    /// Source bucket name
    #[clap(short = 's', long)]
    pub source_bucket: Option<String>,

    /// Only migrate keys starting with this prefix
    #[clap(short = 'p', long)]
    pub prefix: Option<String>,

    /// Custom endpoint URL for an S3-compatible source
    #[clap(long)]
    pub source_endpoint: Option<String>,

    /// Root directory for the local source provider
    #[clap(long)]
    pub source_root: Option<PathBuf>,

    /// Destination provider (s3, oci, local)
    #[clap(long)]
    pub dest_provider: Option<DestinationProvider>,

    /// Credential profile for the destination store
    #[clap(long)]
    pub dest_profile: Option<String>,

    /// Destination bucket name
    #[clap(short = 'd', long)]
    pub dest_bucket: Option<String>,

    /// Object storage namespace (OCI tenancy namespace)
    #[clap(long)]
    pub dest_namespace: Option<String>,

    /// Region of the destination bucket
    #[clap(long)]
    pub dest_region: Option<String>,

    /// Custom endpoint URL for the destination
    #[clap(long)]
    pub dest_endpoint: Option<String>,

    /// Key prefix the archive is published under
    #[clap(long)]
    pub dest_prefix: Option<String>,

    /// Root directory for the local destination provider
    #[clap(long)]
    pub dest_root: Option<PathBuf>,

    /// Directory objects are staged in (a run-scoped subdirectory is created)
    #[clap(long)]
    pub staging_dir: Option<PathBuf>,

    /// Directory the archive is written to
    #[clap(long)]
    pub archive_dir: Option<PathBuf>,

    /// Archive file name
    #[clap(short = 'n', long)]
    pub archive_name: Option<String>,

    /// Number of concurrent object fetches
    #[clap(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Attempts per transfer before giving up
    #[clap(long)]
    pub max_attempts: Option<usize>,

    /// What to do when an object cannot be fetched
    #[clap(long)]
    pub failure_policy: Option<FailurePolicy>,

    /// How object keys map to staged files
    #[clap(long)]
    pub staging_layout: Option<StagingLayout>,

    /// Skip verifying the uploaded archive
    #[clap(long)]
    pub no_verify: bool,

    /// Remove the staging directory after a successful run
    #[clap(long)]
    pub cleanup_staging: bool,

    /// Write a JSON run report to this path
    #[clap(long)]
    pub report: Option<PathBuf>,

    /// Also write log output to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

impl Args {
    /// Values given explicitly on the command line.
    pub fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source_provider: self.source_provider,
            source_profile: self.source_profile.clone(),
            source_region: self.source_region.clone(),
            source_bucket: self.source_bucket.clone(),
            source_prefix: self.prefix.clone(),
            source_endpoint: self.source_endpoint.clone(),
            source_root: self.source_root.clone(),
            dest_provider: self.dest_provider,
            dest_profile: self.dest_profile.clone(),
            dest_bucket: self.dest_bucket.clone(),
            dest_namespace: self.dest_namespace.clone(),
            dest_region: self.dest_region.clone(),
            dest_endpoint: self.dest_endpoint.clone(),
            dest_prefix: self.dest_prefix.clone(),
            dest_root: self.dest_root.clone(),
            staging_dir: self.staging_dir.clone(),
            archive_dir: self.archive_dir.clone(),
            archive_name: self.archive_name.clone(),
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            failure_policy: self.failure_policy,
            staging_layout: self.staging_layout,
            no_verify: self.no_verify,
            cleanup_staging: self.cleanup_staging,
            report_path: self.report.clone(),
        }
    }
}

/// Available subcommands for the migrator.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = "migration.yaml")]
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_args_parsing() {
        let args = Args::parse_from(&[
            "bucket-migrator",
            "--source-bucket", "photos",
            "--prefix", "2024/",
            "--dest-bucket", "backups",
            "--verbose",
        ]);

        assert_eq!(args.source_bucket, Some("photos".to_string()));
        assert_eq!(args.prefix, Some("2024/".to_string()));
        assert_eq!(args.dest_bucket, Some("backups".to_string()));
        assert!(args.verbose);
        assert!(!args.no_verify);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_default_values() {
        let args = Args::parse_from(&["bucket-migrator"]);

        assert!(args.config.is_none());
        assert!(args.concurrency.is_none());
        assert!(args.failure_policy.is_none());
        assert!(!args.verbose);
        assert!(!args.cleanup_staging);

        let overrides = args.to_overrides();
        assert!(overrides.source_bucket.is_none());
        assert!(!overrides.no_verify);
    }

    #[test]
    fn test_provider_and_policy_values() {
        let args = Args::parse_from(&[
            "bucket-migrator",
            "--source-provider", "local",
            "--source-root", "/srv/objects",
            "--dest-provider", "oci",
            "--dest-namespace", "tenancy",
            "--dest-region", "us-ashburn-1",
            "--failure-policy", "skip-and-continue",
            "--staging-layout", "basename",
            "-j", "8",
        ]);

        assert_eq!(args.source_provider, Some(SourceProvider::Local));
        assert_eq!(args.dest_provider, Some(DestinationProvider::Oci));
        assert_eq!(args.failure_policy, Some(FailurePolicy::SkipAndContinue));
        assert_eq!(args.staging_layout, Some(StagingLayout::Basename));

        let overrides = args.to_overrides();
        assert_eq!(overrides.concurrency, Some(8));
        assert_eq!(overrides.source_root, Some(PathBuf::from("/srv/objects")));
        assert_eq!(overrides.dest_namespace, Some("tenancy".to_string()));
    }

    #[test]
    fn test_init_config_subcommand() {
        let args = Args::parse_from(&["bucket-migrator", "init-config", "custom.yaml"]);

        match args.command {
            Some(Commands::InitConfig { path }) => {
                assert_eq!(path, PathBuf::from("custom.yaml"));
            }
            _ => panic!("Expected InitConfig command"),
        }
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result = Args::try_parse_from(&["bucket-migrator", "--failure-policy", "sometimes"]);
        assert!(result.is_err());
    }
}
