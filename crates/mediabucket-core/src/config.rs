//! Configuration module
//!
//! This module provides the immutable configuration for the storage adapter
//! and the HTTP server that exposes it. Values are read once from the
//! environment (optionally via a `.env` file) and never mutated afterward.

use std::env;
use std::fmt;

use crate::constants::{DEFAULT_ACL, DEFAULT_REGION, DEFAULT_SERVER_PORT, DEFAULT_SERVE_BASE_PATH};

/// Parse a boolean flag, failing on anything that is not a recognizable boolean.
fn parse_flag(name: &str, value: &str) -> Result<bool, anyhow::Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!(
            "{} must be a boolean (true/false, 1/0, yes/no, on/off), got {}",
            name,
            other
        )),
    }
}

/// Server settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    /// Path the serve router is mounted under (e.g. `/content/images`)
    pub serve_base_path: String,
    /// Emit JSON log lines instead of the compact console format
    pub log_json: bool,
}

/// Object store settings for one adapter instance.
#[derive(Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Public base URL of stored objects. In dev mode this is also the endpoint.
    pub host: Option<String>,
    pub path_prefix: String,
    pub acl: String,
    /// Server-side encryption mode (`AES256`, `aws:kms`, ...); `None` disables it
    pub server_side_encryption: Option<String>,
    /// Path-style addressing against `host` (MinIO, LocalStack and friends)
    pub dev_mode: bool,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("host", &self.host)
            .field("path_prefix", &self.path_prefix)
            .field("acl", &self.acl)
            .field("server_side_encryption", &self.server_side_encryption)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl StorageConfig {
    /// Minimal configuration for `bucket` with defaults for everything else.
    pub fn new(bucket: impl Into<String>) -> Self {
        StorageConfig {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            host: None,
            path_prefix: String::new(),
            acl: DEFAULT_ACL.to_string(),
            server_side_encryption: None,
            dev_mode: false,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = acl.into();
        self
    }

    /// An empty mode is treated as "no encryption".
    pub fn with_server_side_encryption(mut self, mode: impl Into<String>) -> Self {
        let mode = mode.into();
        self.server_side_encryption = if mode.is_empty() { None } else { Some(mode) };
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Build from an arbitrary variable lookup. `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let Some(bucket) = var("S3_BUCKET") else {
            return Err(anyhow::anyhow!("S3_BUCKET must be set"));
        };
        let dev_mode = match var("S3_DEV_MODE") {
            Some(value) => parse_flag("S3_DEV_MODE", &value)?,
            None => false,
        };
        let access_key = var("S3_ACCESS_KEY_ID").or_else(|| var("AWS_ACCESS_KEY_ID"));
        let secret_key = var("S3_SECRET_ACCESS_KEY").or_else(|| var("AWS_SECRET_ACCESS_KEY"));

        let config = StorageConfig {
            bucket,
            region: var("S3_REGION")
                .or_else(|| var("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: access_key,
            secret_access_key: secret_key,
            host: var("S3_HOST"),
            path_prefix: var("S3_PATH_PREFIX").unwrap_or_default(),
            acl: var("S3_ACL").unwrap_or_else(|| DEFAULT_ACL.to_string()),
            server_side_encryption: var("S3_SERVER_SIDE_ENCRYPTION"),
            dev_mode,
        };

        config.validate()?;
        Ok(config)
    }

    /// Base URL every stored object is reachable under, without a trailing slash.
    ///
    /// Falls back to the virtual-hosted AWS URL when no host is configured.
    pub fn public_base_url(&self) -> String {
        match self.host {
            Some(ref host) => host.trim_end_matches('/').to_string(),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    /// Path-style references carry the bucket as their first path segment.
    pub fn embeds_bucket_in_path(&self) -> bool {
        self.dev_mode
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("S3_BUCKET must not be empty"));
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(anyhow::anyhow!(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together"
            ));
        }

        if let Some(ref host) = self.host {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "S3_HOST must be an http:// or https:// URL, got {}",
                    host
                ));
            }
        } else if self.dev_mode {
            return Err(anyhow::anyhow!(
                "S3_DEV_MODE=true requires S3_HOST to point at the custom endpoint"
            ));
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let base = BaseConfig {
            server_port: lookup("PORT")
                .unwrap_or_else(|| DEFAULT_SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            serve_base_path: lookup("SERVE_BASE_PATH")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVE_BASE_PATH.to_string()),
            log_json: lookup("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        if !base.serve_base_path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "SERVE_BASE_PATH must start with '/', got {}",
                base.serve_base_path
            ));
        }

        let storage = StorageConfig::from_lookup(&lookup)?;

        Ok(Config { base, storage })
    }

    pub fn server_port(&self) -> u16 {
        self.base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.base.environment
    }

    pub fn serve_base_path(&self) -> &str {
        &self.base.serve_base_path
    }

    pub fn log_json(&self) -> bool {
        self.base.log_json
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }
}
