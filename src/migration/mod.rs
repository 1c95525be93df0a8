//! The transfer pipeline.
//!
//! Components, leaves first:
//!
//! - [`lister::SourceLister`]: enumerate objects under a bucket and prefix
//! - [`fetcher::ObjectFetcher`]: download one object into staging, with retries
//! - [`archiver::Archiver`]: pack the staging tree into one zip archive
//! - [`publisher::DestinationPublisher`]: upload and verify the archive
//! - [`pipeline::MigrationPipeline`]: run the stages in order as a state machine
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bucket_migrator::cloud::local::LocalStore;
//! use bucket_migrator::config::MigrationConfig;
//! use bucket_migrator::migration::MigrationPipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let mut config = MigrationConfig::default();
//! config.source.bucket = "photos".to_string();
//! config.destination.bucket = "backups".to_string();
//!
//! let store = Arc::new(LocalStore::new("/srv/objects"));
//! let result = MigrationPipeline::new(config, store.clone(), store)
//!     .run(CancellationToken::new())
//!     .await;
//! println!("{}", result.message());
//! # }
//! ```

/// Archive creation from the staging tree
pub mod archiver;

/// Single-object downloads
pub mod fetcher;

/// Paginated source listing
pub mod lister;

/// Orchestration state machine and fetch worker pool
pub mod pipeline;

/// Archive upload and verification
pub mod publisher;

/// Bounded exponential backoff
pub mod retry;

/// Run-scoped staging directory
pub mod staging;

pub use archiver::Archiver;
pub use fetcher::ObjectFetcher;
pub use lister::SourceLister;
pub use pipeline::MigrationPipeline;
pub use publisher::DestinationPublisher;
pub use retry::RetryPolicy;
pub use staging::StagingArea;
