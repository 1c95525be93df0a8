//! # bucket-migrator
//!
//! Bulk migration of an object-storage prefix from one provider to another.
//!
//! ## Overview
//!
//! A run lists every object under a source bucket and prefix, fetches them
//! into a run-scoped staging directory with a bounded pool of workers, packs
//! the staging tree into a single zip archive and publishes that archive to
//! a destination bucket, verifying what landed.
//!
//! ## Features
//!
//! - **Providers**: Amazon S3, Oracle Cloud Object Storage (S3 compatibility
//!   endpoint) and a local directory tree
//! - **Parallel fetch**: bounded worker pool with per-object retries and timeouts
//! - **Failure policies**: fail-fast or skip-and-continue with a list of failed keys
//! - **Atomic outputs**: staged objects and the archive are renamed into place
//!   only when complete
//! - **Upload verification**: size and SHA-256 checks after publishing
//! - **Cancellation**: Ctrl-C stops dispatching work and discards partial output
//!
//! ## Usage
//!
//! ```no_run
//! use bucket_migrator::cloud::{build_destination_store, build_source_store};
//! use bucket_migrator::config::{load_config, ConfigOverrides};
//! use bucket_migrator::migration::MigrationPipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = load_config(None, &ConfigOverrides::default(), |name| std::env::var(name).ok())?;
//! let source = build_source_store(&config)?;
//! let destination = build_destination_store(&config)?;
//!
//! let result = MigrationPipeline::new(config, source, destination)
//!     .run(CancellationToken::new())
//!     .await;
//! println!("{}", result.message());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`config`]: Configuration loading, precedence and validation
//! - [`cloud`]: Source and destination store clients
//! - [`migration`]: The listing, fetch, archive and publish pipeline
//! - [`models`]: Run state, results and summaries
//! - [`error`]: Pipeline error taxonomy
//! - [`utils`]: Hashing, path mapping and reporting
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Error taxonomy for pipeline stages
pub mod error;

/// Utility functions for hashing, paths and reporting
pub mod utils;

/// Object store clients (S3, OCI, local)
pub mod cloud;

/// Configuration management
pub mod config;

/// The migration pipeline
pub mod migration;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
