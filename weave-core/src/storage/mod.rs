//! Object storage primitives
//!
//! Each call is one blocking REST round-trip: it either succeeds as a whole
//! or fails the run. No append or byte-range writes exist at this layer.

pub mod memory;
pub mod multipart;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use memory::MemoryStore;
pub use s3::{S3Client, S3Config};

/// Metadata returned by HEAD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Content length in bytes
    pub size: u64,
    /// Raw content tag as reported by the store
    pub etag: Option<String>,
}

/// REST verbs of an S3-compatible store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// HEAD; `None` when the object does not exist
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// PUT replacing the whole object; returns the raw content tag
    async fn put(&self, key: &str, data: Bytes) -> Result<String>;

    /// PUT one part of a multipart upload; returns the raw content tag
    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u64,
        data: Bytes,
    ) -> Result<String>;

    /// POST `?uploads`; returns the raw response document
    async fn initiate_multipart(&self, key: &str) -> Result<String>;

    /// POST `?uploadId=`; `body` is a rendered completion request
    async fn complete_multipart(&self, key: &str, upload_id: &str, body: String) -> Result<()>;

    /// Ranged GET of `len` bytes at `offset`
    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes>;

    /// DELETE
    async fn delete(&self, key: &str) -> Result<()>;
}
