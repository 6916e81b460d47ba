//! Configuration
//!
//! Defaults suit a local S3-compatible endpoint. Values can come from the
//! environment (as the worker binary does) or from a JSON document.

use serde::Deserialize;

use crate::error::{Result, WeaveError};
use crate::storage::S3Config;
use crate::DEFAULT_MAX_UPLOAD_ID_LEN;

/// How workers map onto objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// N:1, every worker writes parts of one multipart upload
    Shared,
    /// N:N, every worker owns its own object
    FilePerProcess,
}

impl Layout {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "shared" | "n1" => Ok(Layout::Shared),
            "file-per-process" | "nn" => Ok(Layout::FilePerProcess),
            other => Err(WeaveError::Config {
                reason: format!("unknown layout '{}'", other),
            }),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// Store connection
    pub s3: S3Config,
    /// Object layout
    pub layout: Layout,
    /// Longest upload id accepted from the store
    pub max_upload_id_len: usize,
    /// Global number of the first part (0, or 1 for stores that require it)
    pub first_part_number: u64,
    /// Create the bucket if it does not exist
    pub ensure_bucket: bool,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            s3: S3Config::default(),
            layout: Layout::Shared,
            max_upload_id_len: DEFAULT_MAX_UPLOAD_ID_LEN,
            first_part_number: 0,
            ensure_bucket: true,
        }
    }
}

impl WeaveConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
            config.s3.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            config.s3.bucket = bucket;
        }
        if let Ok(region) = std::env::var("S3_REGION") {
            config.s3.region = region;
        }
        if let Ok(layout) = std::env::var("WEAVE_LAYOUT") {
            config.layout = Layout::parse(&layout)?;
        }
        if let Ok(first) = std::env::var("WEAVE_FIRST_PART_NUMBER") {
            config.first_part_number = first.parse().map_err(|e| WeaveError::Config {
                reason: format!("WEAVE_FIRST_PART_NUMBER={}: {}", first, e),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| WeaveError::Config {
            reason: format!("Deserialization failed: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_upload_id_len == 0 {
            return Err(WeaveError::Config {
                reason: "max_upload_id_len must be positive".into(),
            });
        }
        if self.s3.bucket.is_empty() {
            return Err(WeaveError::Config {
                reason: "bucket name is empty".into(),
            });
        }
        Ok(())
    }
}
