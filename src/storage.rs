//! MinIO/S3 storage client for fetching test batteries

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use tracing::info;

/// Connection settings read from `MINIO_*` variables
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub endpoint: String,
    pub port: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

impl StorageSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        Self {
            endpoint: get("MINIO_ENDPOINT", "localhost"),
            port: get("MINIO_PORT", "9000"),
            access_key: get("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: get("MINIO_SECRET_KEY", "minioadmin"),
            bucket: get("MINIO_BUCKET", "sortbot-storage"),
            use_ssl: lookup("MINIO_USE_SSL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    pub fn endpoint_url(&self) -> String {
        let protocol = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.endpoint, self.port)
    }
}

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    pub fn new(settings: &StorageSettings) -> Self {
        let endpoint_url = settings.endpoint_url();
        info!("Using MinIO at {} (bucket {})", endpoint_url, settings.bucket);

        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "minio",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    pub async fn from_env() -> Result<Self> {
        Ok(Self::new(&StorageSettings::from_lookup(|k| std::env::var(k).ok())))
    }

    /// Download an object as UTF-8 text
    pub async fn download_string(&self, key: &str) -> Result<String> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;

        let data = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", key))?;
        String::from_utf8(data.into_bytes().to_vec()).context("Invalid UTF-8 content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = StorageSettings::from_lookup(|_| None);
        assert_eq!(settings.endpoint_url(), "http://localhost:9000");
        assert_eq!(settings.bucket, "sortbot-storage");
        assert!(!settings.use_ssl);
    }

    #[test]
    fn test_settings_ssl_endpoint() {
        let settings = StorageSettings::from_lookup(|k| match k {
            "MINIO_ENDPOINT" => Some("minio.internal".into()),
            "MINIO_PORT" => Some("443".into()),
            "MINIO_USE_SSL" => Some("1".into()),
            _ => None,
        });
        assert_eq!(settings.endpoint_url(), "https://minio.internal:443");
    }
}
