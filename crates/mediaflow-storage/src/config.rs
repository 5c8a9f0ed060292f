//! Object store configuration.

/// Configuration for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Endpoint the services talk to
    pub endpoint_url: String,
    /// Endpoint baked into presigned URLs handed to clients, when it differs
    pub public_url: Option<String>,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Signing region
    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://minio:9000".to_string(),
            public_url: None,
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            bucket_name: "media".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str, default: String| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        Self {
            endpoint_url: var("S3_ENDPOINT_URL", defaults.endpoint_url),
            public_url: std::env::var("S3_PUBLIC_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            access_key_id: var("S3_ACCESS_KEY_ID", defaults.access_key_id),
            secret_access_key: var("S3_SECRET_ACCESS_KEY", defaults.secret_access_key),
            bucket_name: var("S3_BUCKET", defaults.bucket_name),
            region: var("S3_REGION", defaults.region),
        }
    }

    /// Endpoint used for presigning.
    pub fn presign_endpoint(&self) -> &str {
        self.public_url.as_deref().unwrap_or(&self.endpoint_url)
    }
}
