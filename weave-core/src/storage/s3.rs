//! S3-compatible storage client
//!
//! Pure-Rust async client using reqwest. Requests are unsigned; the store
//! is expected to accept anonymous access or sit behind a signing proxy.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::multipart;
use super::{ObjectMeta, ObjectStore};
use crate::error::{Result, WeaveError};

/// Configuration for S3 client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Region
    pub region: String,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            bucket: "weave".into(),
            region: "us-east-1".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

/// S3-compatible storage client using reqwest
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| WeaveError::Config {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Build URL for an object
    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), self.config.bucket)
    }

    /// Make sure the bucket exists, creating it on 404
    pub async fn ensure_bucket(&self) -> Result<()> {
        let bucket = self.config.bucket.clone();
        let resp = self
            .client
            .head(self.bucket_url())
            .send()
            .await
            .map_err(|e| transport("HEAD bucket", &bucket, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            info!("Bucket '{}' doesn't exist, creating", bucket);
            let resp = self
                .client
                .put(self.bucket_url())
                .send()
                .await
                .map_err(|e| transport("PUT bucket", &bucket, e))?;
            check_status("PUT bucket", &bucket, resp).await?;
            info!("Created bucket '{}'", bucket);
            return Ok(());
        }

        check_status("HEAD bucket", &bucket, resp).await?;
        Ok(())
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let resp = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| transport("HEAD", key, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status("HEAD", key, resp).await?;

        let size = resp
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Some(ObjectMeta {
            size,
            etag: etag_header(&resp),
        }))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        let len = data.len();
        let resp = self
            .client
            .put(self.object_url(key))
            .body(data)
            .send()
            .await
            .map_err(|e| transport("PUT", key, e))?;
        let resp = check_status("PUT", key, resp).await?;

        let etag = etag_header(&resp).unwrap_or_default();
        debug!("Put {} complete ({} bytes), etag={}", key, len, etag);
        Ok(etag)
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u64,
        data: Bytes,
    ) -> Result<String> {
        let resp = self
            .client
            .put(self.object_url(key))
            .query(&[
                ("partNumber", part_number.to_string()),
                ("uploadId", upload_id.to_string()),
            ])
            .body(data)
            .send()
            .await
            .map_err(|e| transport("PUT part", key, e))?;
        let resp = check_status("PUT part", key, resp).await?;

        etag_header(&resp).ok_or_else(|| WeaveError::Transport {
            op: "PUT part",
            key: key.into(),
            reason: format!("no ETag header for part {}", part_number),
        })
    }

    async fn initiate_multipart(&self, key: &str) -> Result<String> {
        let url = format!("{}?uploads", self.object_url(key));
        let resp = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| transport("POST uploads", key, e))?;
        let resp = check_status("POST uploads", key, resp).await?;

        resp.text()
            .await
            .map_err(|e| transport("POST uploads", key, e))
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, body: String) -> Result<()> {
        let resp = self
            .client
            .post(self.object_url(key))
            .query(&[("uploadId", upload_id)])
            .header(header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| transport("POST complete", key, e))?;
        let resp = check_status("POST complete", key, resp).await?;

        // A 200 may still carry an <Error> document.
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| transport("POST complete", key, e))?;
        if multipart::is_error_document(&text) {
            return Err(WeaveError::Status {
                op: "POST complete",
                key: key.into(),
                status,
                body: text,
            });
        }

        debug!("Completed multipart upload for {}", key);
        Ok(())
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let range = range_header(offset, len).ok_or_else(|| WeaveError::Config {
            reason: format!("range {}+{} of {} exceeds u64", offset, len, key),
        })?;
        let resp = self
            .client
            .get(self.object_url(key))
            .header(header::RANGE, range)
            .send()
            .await
            .map_err(|e| transport("GET", key, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(WeaveError::ObjectNotFound { key: key.into() });
        }
        let resp = check_status("GET", key, resp).await?;

        resp.bytes().await.map_err(|e| transport("GET", key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| transport("DELETE", key, e))?;
        check_status("DELETE", key, resp).await?;

        debug!("Deleted {}", key);
        Ok(())
    }
}

fn transport(op: &'static str, key: &str, err: reqwest::Error) -> WeaveError {
    WeaveError::Transport {
        op,
        key: key.into(),
        reason: err.to_string(),
    }
}

/// Pass success responses through; turn anything else into `Status`
async fn check_status(op: &'static str, key: &str, resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(WeaveError::Status {
        op,
        key: key.into(),
        status,
        body,
    })
}

/// Inclusive `Range` header value; `None` if the end does not fit in u64
fn range_header(offset: u64, len: u64) -> Option<String> {
    let last = offset.checked_add(len.checked_sub(1)?)?;
    Some(format!("bytes={}-{}", offset, last))
}

fn etag_header(resp: &Response) -> Option<String> {
    resp.headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
