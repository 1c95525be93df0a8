use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::{write::FileOptions, ZipWriter};

use crate::constants::{
    COMPRESSED_EXTENSIONS, COMPRESSION_CHUNK_SIZE as CHUNK_SIZE, LARGE_FILE_COMPRESSION_THRESHOLD,
    PARTIAL_ARCHIVE_INFIX, ZIP64_THRESHOLD,
};
use crate::error::{MigrationError, StageResult};
use crate::models::ArchiveArtifact;
use crate::utils::hash::calculate_sha256;

/// File entry with its compression options
struct FileEntry {
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
}

/// Determine compression options based on file type and size.
///
/// Files that are already compressed (like JPEGs, MP3s) or very large files
/// use minimal compression for better throughput.
///
/// # Arguments
///
/// * `path` - Path to the file, used for its extension
/// * `size` - File size in bytes
///
/// # Returns
///
/// `FileOptions` configured with the appropriate compression method
pub fn get_compression_options(path: &Path, size: u64) -> FileOptions {
    let low_compression = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => COMPRESSED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        _ => false,
    };
    let large_file = size > LARGE_FILE_COMPRESSION_THRESHOLD;

    let level = if low_compression || large_file { 1 } else { 6 };
    FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(level))
        .unix_permissions(0o644)
        .large_file(size > ZIP64_THRESHOLD)
}

/// Packs a staging tree into a single zip archive.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    cancel: CancellationToken,
}

impl Archiver {
    pub fn new() -> Self {
        Archiver::default()
    }

    /// Abort between chunks once `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Archiver { cancel }
    }

    /// Archive every regular file under `source_dir` into `output_path`.
    ///
    /// Entries are named by their path relative to `source_dir` (with `/`
    /// separators) and written in sorted order. The archive is built at
    /// `<output_path>.partial-<uuid>` and renamed into place only after it
    /// has been fully written; on failure or cancellation the temporary is
    /// removed and `output_path` is left untouched.
    ///
    /// # Returns
    ///
    /// * `Ok(ArchiveArtifact)` - Final path, size, entry count and SHA-256
    /// * `Err` - `ArchiveIo` on read/write failure, `Cancelled` if cancelled
    pub fn archive(&self, source_dir: &Path, output_path: &Path) -> StageResult<ArchiveArtifact> {
        let start = Instant::now();
        info!("Archiving {} into {}", source_dir.display(), output_path.display());

        let entries = collect_entries(source_dir)?;
        let temp_path = partial_archive_path(output_path);

        if let Err(e) = self.write_archive(&entries, &temp_path) {
            if let Err(remove_err) = fs::remove_file(&temp_path) {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial archive {}: {}", temp_path.display(), remove_err);
                }
            }
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, output_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(MigrationError::archive_io("rename into place", output_path, e));
        }

        let size_bytes = fs::metadata(output_path)
            .map_err(|e| MigrationError::archive_io("stat archive", output_path, e))?
            .len();
        let sha256 = calculate_sha256(output_path)
            .map_err(|e| MigrationError::archive_io("hash archive", output_path, e))?;

        info!(
            "Archived {} files into {} ({} bytes) in {:?}",
            entries.len(),
            output_path.display(),
            size_bytes,
            start.elapsed()
        );

        Ok(ArchiveArtifact {
            path: output_path.to_path_buf(),
            size_bytes,
            entry_count: entries.len(),
            sha256,
        })
    }

    fn write_archive(&self, entries: &[FileEntry], temp_path: &Path) -> StageResult<()> {
        let file = fs::File::create(temp_path)
            .map_err(|e| MigrationError::archive_io("create archive", temp_path, e))?;
        let mut zip = ZipWriter::new(file);
        let mut buffer = vec![0u8; CHUNK_SIZE];

        for entry in entries {
            self.check_cancelled()?;

            let file = fs::File::open(&entry.abs_path)
                .map_err(|e| MigrationError::archive_io("open staged file", &entry.abs_path, e))?;
            let mut reader = BufReader::new(file);

            zip.start_file(entry.rel_path.clone(), get_compression_options(&entry.abs_path, entry.size))
                .map_err(|e| MigrationError::archive_io("start entry", temp_path, e))?;

            // Stream file content in chunks to avoid large memory usage
            loop {
                self.check_cancelled()?;
                let bytes_read = reader
                    .read(&mut buffer)
                    .map_err(|e| MigrationError::archive_io("read staged file", &entry.abs_path, e))?;
                if bytes_read == 0 {
                    break;
                }
                zip.write_all(&buffer[..bytes_read])
                    .map_err(|e| MigrationError::archive_io("write entry", temp_path, e))?;
            }

            debug!("Added {} ({} bytes)", entry.rel_path, entry.size);
        }

        let file = zip
            .finish()
            .map_err(|e| MigrationError::archive_io("finalize archive", temp_path, e))?;
        file.sync_all()
            .map_err(|e| MigrationError::archive_io("sync archive", temp_path, e))
    }

    fn check_cancelled(&self) -> StageResult<()> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn partial_archive_path(output_path: &Path) -> PathBuf {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_path.with_file_name(format!("{}{}{}", name, PARTIAL_ARCHIVE_INFIX, Uuid::new_v4()))
}

/// Walk the staging tree and return regular files sorted by entry name.
fn collect_entries(source_dir: &Path) -> StageResult<Vec<FileEntry>> {
    if !source_dir.is_dir() {
        return Err(MigrationError::archive_io(
            "read staging tree",
            source_dir,
            "not a directory",
        ));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(|e| MigrationError::archive_io("walk staging tree", source_dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel_path = match entry.path().strip_prefix(source_dir) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };
        let size = entry
            .metadata()
            .map_err(|e| MigrationError::archive_io("stat staged file", entry.path(), e))?
            .len();
        entries.push(FileEntry {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            size,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}
