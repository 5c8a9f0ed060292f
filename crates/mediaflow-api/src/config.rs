//! API configuration.

use std::time::Duration;

use mediaflow_models::STEP_RESIZE;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Lifetime of presigned upload and download URLs
    pub upload_url_ttl: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Step dispatched when an upload completes
    pub first_step: String,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            upload_url_ttl: Duration::from_secs(300),
            max_body_size: 1024 * 1024, // 1MB, bodies are small JSON
            first_step: STEP_RESIZE.to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            upload_url_ttl: std::env::var("UPLOAD_URL_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.upload_url_ttl),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            first_step: std::env::var("PIPELINE_STEPS")
                .ok()
                .and_then(|s| {
                    s.split(',')
                        .map(str::trim)
                        .find(|s| !s.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or(defaults.first_step),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
