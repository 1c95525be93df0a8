use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use log::debug;

use crate::config::migration_config::MigrationConfig;
use crate::constants::ENV_PREFIX;

/// Expand Unix-style environment variables ($VAR and ${VAR}) and a leading `~`
pub fn expand_path_vars(path: &str) -> String {
    let expanded = parse_unix_env_vars(path, |name| std::env::var(name).ok());
    expand_home(&expanded, std::env::var("HOME").ok().as_deref())
}

/// Replace a leading `~` or `~/` with the home directory
pub fn expand_home(path: &str, home: Option<&str>) -> String {
    match home {
        Some(home) if path == "~" => home.to_string(),
        Some(home) if path.starts_with("~/") => format!("{}/{}", home.trim_end_matches('/'), &path[2..]),
        _ => path.to_string(),
    }
}

/// Parse Unix-style environment variables ($VAR and ${VAR})
///
/// Unknown `${VAR}` references are removed; unknown `$VAR` references are
/// left untouched.
pub fn parse_unix_env_vars<F>(path: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = path.to_string();

    // First handle ${VAR} style variables
    let mut search_from = 0;
    while let Some(offset) = result[search_from..].find("${") {
        let start = search_from + offset;
        let Some(end) = result[start + 2..].find('}') else {
            // No closing }, stop to avoid looping forever
            break;
        };
        let var_name = result[start + 2..start + 2 + end].to_string();
        let value = lookup(&var_name).unwrap_or_default();
        result.replace_range(start..start + 3 + end, &value);
        search_from = start + value.len();
    }

    // Then handle $VAR style variables
    let mut i = 0;
    while let Some(pos) = result[i..].find('$') {
        let var_start = i + pos;
        let var_end = result[var_start + 1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map(|n| var_start + 1 + n)
            .unwrap_or(result.len());

        if var_end == var_start + 1 {
            i = var_start + 1;
            continue;
        }

        let var_name = result[var_start + 1..var_end].to_string();
        match lookup(&var_name) {
            Some(value) => {
                result.replace_range(var_start..var_end, &value);
                i = var_start + value.len();
            }
            None => i = var_end,
        }
    }

    result
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", name, other)),
    }
}

fn parse_enum<T: ValueEnum>(name: &str, value: &str) -> Result<T> {
    T::from_str(value.trim(), true).map_err(|e| anyhow!("{}: {}", name, e))
}

/// Overlay `MIGRATE_*` variables onto a configuration.
///
/// `lookup` receives the full variable name; passing `std::env::var` reads
/// the process environment.
pub fn apply_env_overrides<F>(config: &mut MigrationConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| -> Option<(String, String)> {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name).map(|value| (name, value))
    };

    if let Some((name, v)) = get("SOURCE_PROVIDER") {
        config.source.provider = parse_enum(&name, &v)?;
    }
    if let Some((_, v)) = get("SOURCE_PROFILE") {
        config.source.profile = v;
    }
    if let Some((_, v)) = get("SOURCE_REGION") {
        config.source.region = v;
    }
    if let Some((_, v)) = get("SOURCE_BUCKET") {
        config.source.bucket = v;
    }
    if let Some((_, v)) = get("SOURCE_PREFIX") {
        config.source.prefix = v;
    }
    if let Some((_, v)) = get("SOURCE_ENDPOINT") {
        config.source.endpoint = Some(v);
    }
    if let Some((_, v)) = get("SOURCE_ROOT") {
        config.source.root = Some(PathBuf::from(v));
    }

    if let Some((name, v)) = get("DEST_PROVIDER") {
        config.destination.provider = parse_enum(&name, &v)?;
    }
    if let Some((_, v)) = get("DEST_PROFILE") {
        config.destination.profile = v;
    }
    if let Some((_, v)) = get("DEST_BUCKET") {
        config.destination.bucket = v;
    }
    if let Some((_, v)) = get("DEST_NAMESPACE") {
        config.destination.namespace = Some(v);
    }
    if let Some((_, v)) = get("DEST_REGION") {
        config.destination.region = Some(v);
    }
    if let Some((_, v)) = get("DEST_ENDPOINT") {
        config.destination.endpoint = Some(v);
    }
    if let Some((_, v)) = get("DEST_PREFIX") {
        config.destination.object_prefix = Some(v);
    }
    if let Some((_, v)) = get("DEST_ROOT") {
        config.destination.root = Some(PathBuf::from(v));
    }

    if let Some((_, v)) = get("STAGING_DIR") {
        config.staging_dir = PathBuf::from(v);
    }
    if let Some((_, v)) = get("ARCHIVE_DIR") {
        config.archive_dir = PathBuf::from(v);
    }
    if let Some((_, v)) = get("ARCHIVE_NAME") {
        config.archive_name = v;
    }
    if let Some((name, v)) = get("CONCURRENCY") {
        config.transfer.concurrency = v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive integer", name))?;
    }
    if let Some((name, v)) = get("MAX_ATTEMPTS") {
        config.transfer.max_attempts = v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive integer", name))?;
    }
    if let Some((name, v)) = get("FAILURE_POLICY") {
        config.failure_policy = parse_enum(&name, &v)?;
    }
    if let Some((name, v)) = get("STAGING_LAYOUT") {
        config.staging_layout = parse_enum(&name, &v)?;
    }
    if let Some((name, v)) = get("VERIFY_UPLOAD") {
        config.verify_upload = parse_bool(&name, &v)?;
    }
    if let Some((name, v)) = get("CLEANUP_STAGING") {
        config.cleanup_staging = parse_bool(&name, &v)?;
    }
    if let Some((_, v)) = get("REPORT_PATH") {
        config.report_path = Some(PathBuf::from(v));
    }

    debug!("Applied {}* environment overrides", ENV_PREFIX);
    Ok(())
}

/// Expand variables in every path-valued field
pub fn expand_config_paths(config: &mut MigrationConfig) {
    let expand = |p: &PathBuf| PathBuf::from(expand_path_vars(&p.to_string_lossy()));

    config.staging_dir = expand(&config.staging_dir);
    config.archive_dir = expand(&config.archive_dir);
    config.source.root = config.source.root.as_ref().map(expand);
    config.destination.root = config.destination.root.as_ref().map(expand);
    config.report_path = config.report_path.as_ref().map(expand);
}
