//! Path helpers for mapping object keys into the staging tree.
//!
//! Object keys are arbitrary strings; these functions make sure whatever we
//! derive from them stays inside the directory it is meant for.

use std::env;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

/// Convert an object key into a relative path that cannot escape its base.
///
/// Empty and `.` segments are dropped, a leading `/` is ignored, and `..`
/// segments or null bytes are rejected.
///
/// # Returns
///
/// * `Ok(PathBuf)` - Relative path with at least one component
/// * `Err(String)` - Reason the key cannot be staged
pub fn key_to_relative_path(key: &str) -> std::result::Result<PathBuf, String> {
    if key.contains('\0') {
        return Err("key contains null bytes".to_string());
    }

    let mut relative = PathBuf::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err("key contains '..' segment".to_string()),
            name => relative.push(sanitize_component(name)),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err("key has no file name component".to_string());
    }

    Ok(relative)
}

/// Last non-empty segment of an object key.
pub fn key_basename(key: &str) -> Option<String> {
    key.split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .last()
        .map(sanitize_component)
}

/// Replace characters the local filesystem cannot hold in a single component.
pub fn sanitize_component(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());

    for ch in name.chars() {
        match ch {
            '\\' => sanitized.push('_'),
            '<' | '>' | ':' | '"' | '|' | '?' | '*' if cfg!(windows) => sanitized.push('_'),
            c if c.is_control() => sanitized.push('_'),
            c => sanitized.push(c),
        }
    }

    sanitized
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// Relative paths are anchored at the current working directory so two
/// spellings of the same location compare equal.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let anchored = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in anchored.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Whether `path` is `base` or lies underneath it.
pub fn is_within(path: &Path, base: &Path) -> bool {
    normalize_lexically(path).starts_with(normalize_lexically(base))
}

/// Ensure `name` is a single file name rather than a path.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("file name is empty");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("'{}' must be a file name, not a path", name);
    }
    if name == "." || name == ".." {
        bail!("'{}' is not a valid file name", name);
    }
    if name.contains('\0') {
        bail!("file name contains null bytes");
    }
    Ok(())
}
