//! S3-compatible storage client.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::{debug, info};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::object_store::{validate_object_name, ObjectStore};

/// Default lifetime of a presigned source URL.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint used by this process
    pub endpoint_url: String,
    /// Endpoint the encoder container reaches storage through, if different
    pub container_endpoint_url: Option<String>,
    /// Static credentials; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
    pub presign_expiry: Duration,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint_url = std::env::var("S3_ENDPOINT_URL")
            .map_err(|_| StorageError::Config("S3_ENDPOINT_URL not set".into()))?;
        Url::parse(&endpoint_url)?;

        let container_endpoint_url = std::env::var("S3_CONTAINER_ENDPOINT_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());
        if let Some(url) = &container_endpoint_url {
            Url::parse(url)?;
        }

        Ok(Self {
            endpoint_url,
            container_endpoint_url,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            presign_expiry: Duration::from_secs(
                std::env::var("S3_PRESIGN_EXPIRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PRESIGN_EXPIRY.as_secs()),
            ),
        })
    }
}

/// S3-compatible [`ObjectStore`].
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    /// Signs URLs against the container-reachable endpoint, so the host the
    /// encoder connects to is the host covered by the signature.
    presign_client: Client,
    presign_expiry: Duration,
}

impl S3ObjectStore {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let region = Region::new(config.region.clone());
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;
        let mut base = Builder::from(&sdk_config)
            .region(region)
            .force_path_style(true);

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                base = base.credentials_provider(Credentials::new(key, secret, None, None, "vidcache"));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::Config(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together".into(),
                ))
            }
        }

        let client = Client::from_conf(base.clone().endpoint_url(&config.endpoint_url).build());
        let presign_endpoint = config
            .container_endpoint_url
            .as_deref()
            .unwrap_or(&config.endpoint_url);
        let presign_client = Client::from_conf(base.endpoint_url(presign_endpoint).build());

        info!(
            endpoint = %config.endpoint_url,
            container_endpoint = %presign_endpoint,
            "S3 object store configured"
        );

        Ok(Self {
            client,
            presign_client,
            presign_expiry: config.presign_expiry,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(S3Config::from_env()?).await
    }

    /// Generate a presigned GET URL reachable from the encoder container.
    pub async fn presign_get(&self, bucket: &str, object: &str) -> StorageResult<String> {
        validate_object_name(object)?;
        let presign_config = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| StorageError::presign(bucket, object, e))?;

        let presigned = self
            .presign_client
            .get_object()
            .bucket(bucket)
            .key(object)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::presign(bucket, object, e))?;

        debug!(bucket = bucket, object = object, "Presigned source URL");
        Ok(presigned.uri().to_string())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("head bucket {}: {}", bucket, e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn container_url(&self, bucket: &str, object: &str) -> StorageResult<String> {
        self.presign_get(bucket, object).await
    }

    async fn object_size(&self, bucket: &str, object: &str) -> StorageResult<u64> {
        validate_object_name(object)?;
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::object_missing(bucket, object)
                } else {
                    StorageError::Backend(format!("head object {}/{}: {}", bucket, object, e))
                }
            })?;

        Ok(response.content_length().unwrap_or(0).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(container: Option<&str>) -> S3Config {
        S3Config {
            endpoint_url: "http://localhost:9000".to_string(),
            container_endpoint_url: container.map(str::to_string),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio-secret".to_string()),
            region: "us-east-1".to_string(),
            presign_expiry: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_presigned_url_uses_container_endpoint() {
        let store = S3ObjectStore::new(config(Some("http://minio:9000"))).await.unwrap();
        let url = store.presign_get("media", "videos/1.mp4").await.unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("minio"));
        assert_eq!(parsed.port(), Some(9000));
        assert_eq!(parsed.path(), "/media/videos/1.mp4");
        assert!(parsed.query_pairs().any(|(k, _)| k == "X-Amz-Signature"));
        assert!(parsed
            .query_pairs()
            .any(|(k, v)| k == "X-Amz-Expires" && v == "300"));
    }

    #[tokio::test]
    async fn test_presigned_url_defaults_to_endpoint() {
        let store = S3ObjectStore::new(config(None)).await.unwrap();
        let url = store.container_url("media", "a.jpg").await.unwrap();
        assert!(url.starts_with("http://localhost:9000/media/a.jpg?"));
    }

    #[tokio::test]
    async fn test_rejects_half_configured_credentials() {
        let mut cfg = config(None);
        cfg.secret_access_key = None;
        assert!(matches!(
            S3ObjectStore::new(cfg).await,
            Err(StorageError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal_in_object_name() {
        let store = S3ObjectStore::new(config(None)).await.unwrap();
        assert!(matches!(
            store.presign_get("media", "../secret").await,
            Err(StorageError::UnsafeObjectName(_))
        ));
    }
}
