use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use rusoto_core::{HttpClient, Region};
use rusoto_credential::ProfileProvider;
use rusoto_s3::S3Client;

/// S3 compatibility endpoint for an OCI tenancy namespace and region
pub fn oci_compat_endpoint(namespace: &str, region: &str) -> String {
    format!("https://{}.compat.objectstorage.{}.oraclecloud.com", namespace, region)
}

/// Resolve a region name, falling back to the default on unknown names.
///
/// A custom endpoint always wins and keeps the region name for request signing.
pub fn resolve_region(region_name: Option<&str>, endpoint: Option<&str>) -> Region {
    if let Some(endpoint) = endpoint {
        return Region::Custom {
            name: region_name.unwrap_or("us-east-1").to_string(),
            endpoint: endpoint.to_string(),
        };
    }

    match region_name {
        Some(name) => match name.parse::<Region>() {
            Ok(r) => r,
            Err(_) => {
                warn!("Invalid region '{}', using default", name);
                Region::default()
            }
        },
        None => Region::default(),
    }
}

/// Create an S3 client with the specified region, profile and endpoint
pub fn create_s3_client(
    region_name: Option<&str>,
    profile: Option<&str>,
    endpoint: Option<&str>,
) -> Result<Arc<S3Client>> {
    let region = resolve_region(region_name, endpoint);
    debug!("Creating S3 client for region {} ({:?})", region.name(), endpoint);

    let s3_client = if let Some(profile_name) = profile {
        match ProfileProvider::new() {
            Ok(mut provider) => {
                provider.set_profile(profile_name);
                let http_client = HttpClient::new().context("Failed to create HTTP client")?;
                Arc::new(S3Client::new_with(http_client, provider, region))
            }
            Err(e) => {
                warn!("Failed to create profile provider for '{}': {}, using default chain", profile_name, e);
                Arc::new(S3Client::new(region))
            }
        }
    } else {
        Arc::new(S3Client::new(region))
    };

    Ok(s3_client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_compat_endpoint() {
        assert_eq!(
            oci_compat_endpoint("axaxnpcrorw5", "us-ashburn-1"),
            "https://axaxnpcrorw5.compat.objectstorage.us-ashburn-1.oraclecloud.com"
        );
    }

    #[test]
    fn test_resolve_region_named() {
        assert_eq!(resolve_region(Some("us-west-2"), None).name(), "us-west-2");
    }

    #[test]
    fn test_resolve_region_invalid_falls_back() {
        assert_eq!(resolve_region(Some("not-a-region"), None).name(), Region::default().name());
    }

    #[test]
    fn test_resolve_region_custom_endpoint() {
        let region = resolve_region(Some("us-ashburn-1"), Some("https://objects.example.com"));
        match region {
            Region::Custom { name, endpoint } => {
                assert_eq!(name, "us-ashburn-1");
                assert_eq!(endpoint, "https://objects.example.com");
            }
            other => panic!("expected custom region, got {:?}", other),
        }
    }

    #[test]
    fn test_create_client_without_profile() {
        assert!(create_s3_client(Some("eu-west-1"), None, None).is_ok());
    }
}
