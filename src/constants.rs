//! Global constants for the bucket migrator.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Memory and buffer size constants
/// Chunk size for archive write operations (512KB)
pub const COMPRESSION_CHUNK_SIZE: usize = 512 * 1024;

/// Buffer size for hashing and local copies (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

// Cloud storage constants
/// S3 upload chunk size (8MB, S3 minimum is 5MB)
pub const S3_UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Page size requested from ListObjectsV2
pub const S3_LIST_PAGE_SIZE: i64 = 1000;

/// Large file threshold for multipart uploads (50MB)
pub const LARGE_FILE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Maximum number of multipart parts in flight at once
pub const MULTIPART_CONCURRENCY: usize = 4;

/// Object metadata key carrying the archive checksum
pub const CHECKSUM_METADATA_KEY: &str = "sha256";

// Timeout and retry constants
/// Maximum attempts for a single object transfer
pub const MAX_TRANSFER_ATTEMPTS: usize = 3;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Maximum retry delay in milliseconds
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Per-object fetch timeout in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Upper bound on the fetch worker pool
pub const MAX_FETCH_CONCURRENCY: usize = 16;

/// Lower bound on the default fetch worker pool
pub const MIN_DEFAULT_FETCH_CONCURRENCY: usize = 4;

// File size thresholds
/// Large file threshold for compression decisions (100MB)
pub const LARGE_FILE_COMPRESSION_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Entries above this size need zip64 extensions
pub const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

// Common file extensions
pub const COMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "gz", "xz", "bz2", "7z", "rar", "zst", "jpg", "jpeg", "png", "gif", "mp3", "mp4",
    "avi", "mov", "mpg", "mpeg", "parquet",
];

/// Suffix of the sibling directory holding a run's in-progress downloads
pub const PARTIAL_DOWNLOAD_DIR_SUFFIX: &str = ".partial";

/// Infix for in-progress archives next to the final output
pub const PARTIAL_ARCHIVE_INFIX: &str = ".partial-";

// Defaults mirrored by `MigrationConfig::default`
pub const DEFAULT_SOURCE_PROFILE: &str = "default";
pub const DEFAULT_SOURCE_REGION: &str = "us-east-1";
pub const DEFAULT_DESTINATION_PROFILE: &str = "DEFAULT";
pub const DEFAULT_STAGING_DIR: &str = "/tmp/aws_migration";
pub const DEFAULT_ARCHIVE_DIR: &str = "/tmp";
pub const DEFAULT_ARCHIVE_NAME: &str = "aws_archive.zip";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "MIGRATE_";

/// Default number of concurrent fetches, scaled with the host
pub fn default_fetch_concurrency() -> usize {
    (num_cpus::get() * 2).clamp(MIN_DEFAULT_FETCH_CONCURRENCY, MAX_FETCH_CONCURRENCY)
}
