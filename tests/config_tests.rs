//! Integration tests for configuration loading and precedence.

use std::collections::HashMap;
use std::fs;

use anyhow::Result;
use tempfile::TempDir;

use bucket_migrator::config::{
    load_config, ConfigOverrides, DestinationProvider, FailurePolicy, MigrationConfig,
};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn test_file_env_and_flags_layer_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("migration.yaml");
    fs::write(
        &path,
        r#"
source:
  bucket: from-file
  prefix: logs/
destination:
  provider: s3
  bucket: file-dest
archive_name: file.zip
transfer:
  concurrency: 2
"#,
    )?;

    let overrides = ConfigOverrides {
        archive_name: Some("flag.zip".to_string()),
        ..Default::default()
    };
    let config = load_config(
        Some(&path),
        &overrides,
        env(&[
            ("MIGRATE_DEST_BUCKET", "env-dest"),
            ("MIGRATE_ARCHIVE_NAME", "env.zip"),
            ("MIGRATE_FAILURE_POLICY", "skip-and-continue"),
        ]),
    )?;

    assert_eq!(config.source.bucket, "from-file");
    assert_eq!(config.source.prefix, "logs/");
    assert_eq!(config.destination.provider, DestinationProvider::S3);
    assert_eq!(config.destination.bucket, "env-dest");
    assert_eq!(config.archive_name, "flag.zip");
    assert_eq!(config.failure_policy, FailurePolicy::SkipAndContinue);
    assert_eq!(config.transfer.concurrency, 2);
    Ok(())
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = load_config(
        Some(&dir.path().join("absent.yaml")),
        &ConfigOverrides::default(),
        env(&[]),
    );
    assert!(result.is_err());
}

#[test]
fn test_archive_name_must_be_a_file_name() {
    let overrides = ConfigOverrides {
        source_bucket: Some("src".to_string()),
        dest_bucket: Some("dest".to_string()),
        dest_namespace: Some("ns".to_string()),
        dest_region: Some("us-ashburn-1".to_string()),
        archive_name: Some("nested/archive.zip".to_string()),
        ..Default::default()
    };
    assert!(load_config(None, &overrides, env(&[])).is_err());
}

#[test]
fn test_default_config_round_trips_through_init_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("migration.yaml");
    MigrationConfig::create_default_config_file(&path)?;

    let loaded = MigrationConfig::from_yaml_file(&path)?;
    assert_eq!(loaded, MigrationConfig::default());
    Ok(())
}
