//! Object store clients used by the migration pipeline.
//!
//! The pipeline never talks to a provider directly. It goes through two
//! narrow capability traits:
//!
//! - [`SourceStore`]: paginated listing and download-to-file
//! - [`DestinationStore`]: namespace resolution, upload-from-file and stat
//!
//! ## Providers
//!
//! - **Amazon S3** ([`s3::S3Store`]): rusoto client with a named profile
//! - **Oracle Cloud Object Storage** ([`s3::S3Store`] on the S3 compatibility
//!   endpoint built by [`client::oci_compat_endpoint`])
//! - **Local filesystem** ([`local::LocalStore`]): `root/bucket/key` layout
//!
//! Authentication happens when a client is built; the pipeline only sees
//! ready-to-use trait objects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{DestinationProvider, MigrationConfig, SourceProvider};
use crate::error::StageResult;
use crate::models::ObjectDescriptor;

/// S3 and S3-compatible client construction
pub mod client;

/// rusoto-backed store implementation
pub mod s3;

/// Filesystem-backed store implementation
pub mod local;

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

/// Request to store a local file as an object.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub source: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the file, attached as object metadata when supported.
    pub sha256: Option<String>,
}

/// What the destination reports about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectInfo {
    pub size: u64,
    pub sha256: Option<String>,
}

/// Read side of a migration.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Name used in logs and errors.
    fn describe(&self) -> String;

    /// Fetch one page of keys under `prefix`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StageResult<ListPage>;

    /// Write the object's bytes to `destination`, returning the byte count.
    ///
    /// `destination`'s parent directory exists. Implementations may leave a
    /// partial file behind on error; the caller cleans up.
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> StageResult<u64>;
}

/// Write side of a migration.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Name used in logs and errors.
    fn describe(&self) -> String;

    /// Tenant/namespace context the provider addresses objects under, if any.
    async fn resolve_namespace(&self) -> StageResult<Option<String>>;

    /// Stream a local file to the store. Must not modify the local file.
    async fn upload(&self, request: &UploadRequest, cancel: &CancellationToken) -> StageResult<()>;

    /// Size (and checksum when available) of a stored object.
    async fn stat(&self, bucket: &str, key: &str) -> StageResult<Option<RemoteObjectInfo>>;
}

/// Build the source client described by the configuration.
pub fn build_source_store(config: &MigrationConfig) -> Result<Arc<dyn SourceStore>> {
    let source = &config.source;
    Ok(match source.provider {
        SourceProvider::S3 => Arc::new(s3::S3Store::new(client::create_s3_client(
            Some(&source.region),
            Some(&source.profile),
            source.endpoint.as_deref(),
        )?)),
        SourceProvider::Local => {
            let root = source
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Local source provider requires source.root"))?;
            Arc::new(local::LocalStore::new(root))
        }
    })
}

/// Build the destination client described by the configuration.
pub fn build_destination_store(config: &MigrationConfig) -> Result<Arc<dyn DestinationStore>> {
    let dest = &config.destination;
    Ok(match dest.provider {
        DestinationProvider::S3 => Arc::new(s3::S3Store::new(client::create_s3_client(
            dest.region.as_deref(),
            Some(&dest.profile),
            dest.endpoint.as_deref(),
        )?)),
        DestinationProvider::Oci => {
            let endpoint = match &dest.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => client::oci_compat_endpoint(
                    dest.namespace.as_deref().unwrap_or_default(),
                    dest.region.as_deref().unwrap_or_default(),
                ),
            };
            let s3_client = client::create_s3_client(
                dest.region.as_deref(),
                Some(&dest.profile),
                Some(&endpoint),
            )?;
            Arc::new(s3::S3Store::new(s3_client).with_namespace(dest.namespace.clone()))
        }
        DestinationProvider::Local => {
            let root = dest
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Local destination provider requires destination.root"))?;
            Arc::new(local::LocalStore::new(root))
        }
    })
}
