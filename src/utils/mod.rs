//! Utility functions shared by the pipeline.
//!
//! ## Components
//!
//! - **Hashing**: SHA-256 calculation for upload verification
//! - **Paths**: safe mapping of object keys to local paths
//! - **Report**: JSON run report
//!
//! ### Generating File Hashes
//!
//! ```no_run
//! use bucket_migrator::utils::hash::calculate_sha256;
//! use std::path::Path;
//!
//! # fn example() -> std::io::Result<()> {
//! let hash = calculate_sha256(Path::new("/tmp/aws_archive.zip"))?;
//! println!("SHA-256: {}", hash);
//! # Ok(())
//! # }
//! ```

/// Cryptographic hash calculation utilities
pub mod hash;

/// Object key to local path mapping
pub mod paths;

/// Run report generation
pub mod report;
