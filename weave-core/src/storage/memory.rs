//! In-memory object store
//!
//! Implements the same multipart contract as an S3 endpoint: parts are held
//! per upload id until a completion request names them, in ascending order,
//! with matching tags. Used by the tests and by the worker binary's dry run.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::multipart;
use super::{ObjectMeta, ObjectStore};
use crate::error::{Result, WeaveError};

struct StoredObject {
    data: Bytes,
    etag: String,
}

struct Upload {
    key: String,
    parts: BTreeMap<u64, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, Upload>,
    failing_ops: HashSet<&'static str>,
    initiate_override: Option<String>,
    short_tags: bool,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make every call of `op` answer with a 500.
    ///
    /// `op` is the operation name used in errors, e.g. `"PUT part"`.
    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().failing_ops.insert(op);
    }

    /// Answer session-initiate requests with `body` instead of a fresh id
    pub fn set_initiate_response(&self, body: impl Into<String>) {
        self.state.lock().initiate_override = Some(body.into());
    }

    /// Return truncated tags from part uploads
    pub fn set_short_tags(&self, enabled: bool) {
        self.state.lock().short_tags = enabled;
    }

    /// Current content of an object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).map(|o| o.data.clone())
    }

    /// Number of multipart uploads not yet completed
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Number of parts received so far for an upload
    pub fn part_count(&self, upload_id: &str) -> usize {
        self.state
            .lock()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.len())
            .unwrap_or(0)
    }

    fn check_failure(&self, op: &'static str, key: &str) -> Result<()> {
        if self.state.lock().failing_ops.contains(op) {
            return Err(WeaveError::Status {
                op,
                key: key.into(),
                status: 500,
                body: "<Error><Code>InternalError</Code></Error>".into(),
            });
        }
        Ok(())
    }
}

fn content_tag(data: &[u8]) -> String {
    let hex = blake3::hash(data).to_hex();
    format!("\"{}\"", &hex.as_str()[..crate::CONTENT_TAG_LEN])
}

fn rejected(op: &'static str, key: &str, status: u16, code: &str) -> WeaveError {
    WeaveError::Status {
        op,
        key: key.into(),
        status,
        body: format!("<Error><Code>{}</Code></Error>", code),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.check_failure("HEAD", key)?;
        Ok(self.state.lock().objects.get(key).map(|o| ObjectMeta {
            size: o.data.len() as u64,
            etag: Some(o.etag.clone()),
        }))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        self.check_failure("PUT", key)?;
        let etag = content_tag(&data);
        self.state.lock().objects.insert(
            key.into(),
            StoredObject {
                data,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u64,
        data: Bytes,
    ) -> Result<String> {
        self.check_failure("PUT part", key)?;
        let mut state = self.state.lock();
        let mut etag = content_tag(&data);
        if state.short_tags {
            etag.truncate(9);
            etag.push('"');
        }
        let upload = match state.uploads.get_mut(upload_id) {
            Some(upload) if upload.key == key => upload,
            _ => return Err(rejected("PUT part", key, 404, "NoSuchUpload")),
        };
        upload.parts.insert(part_number, (data, etag.clone()));
        debug!("Stored part {} of upload {}", part_number, upload_id);
        Ok(etag)
    }

    async fn initiate_multipart(&self, key: &str) -> Result<String> {
        self.check_failure("POST uploads", key)?;
        let mut state = self.state.lock();
        if let Some(body) = state.initiate_override.clone() {
            return Ok(body);
        }
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                key: key.into(),
                parts: BTreeMap::new(),
            },
        );
        Ok(multipart::render_initiate_response(&self.bucket, key, &upload_id))
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, body: String) -> Result<()> {
        const OP: &str = "POST complete";
        self.check_failure(OP, key)?;
        let listed = multipart::parse_complete_request(&body)
            .map_err(|_| rejected(OP, key, 400, "MalformedXML"))?;

        let mut state = self.state.lock();
        let upload = match state.uploads.get(upload_id) {
            Some(upload) if upload.key == key => upload,
            _ => return Err(rejected(OP, key, 404, "NoSuchUpload")),
        };

        let mut assembled = BytesMut::new();
        let mut previous: Option<u64> = None;
        for (part_number, etag) in &listed {
            if previous.is_some_and(|p| p >= *part_number) {
                return Err(rejected(OP, key, 400, "InvalidPartOrder"));
            }
            previous = Some(*part_number);
            match upload.parts.get(part_number) {
                Some((data, stored)) if stored.trim_matches('"') == etag => {
                    assembled.extend_from_slice(data)
                }
                _ => return Err(rejected(OP, key, 400, "InvalidPart")),
            }
        }

        let data = assembled.freeze();
        let etag = format!("{}-{}\"", content_tag(&data).trim_end_matches('"'), listed.len());
        state.uploads.remove(upload_id);
        state.objects.insert(key.into(), StoredObject { data, etag });
        Ok(())
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes> {
        self.check_failure("GET", key)?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| WeaveError::ObjectNotFound { key: key.into() })?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        let size = object.data.len() as u64;
        if offset >= size {
            return Err(rejected("GET", key, 416, "InvalidRange"));
        }
        let end = offset.saturating_add(len).min(size);
        Ok(object.data.slice(offset as usize..end as usize))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_failure("DELETE", key)?;
        self.state.lock().objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_head_get() {
        let store = MemoryStore::new("weave");
        assert!(store.head("obj").await.unwrap().is_none());

        let etag = store.put("obj", Bytes::from_static(b"hello world")).await.unwrap();
        assert_eq!(etag.len(), crate::CONTENT_TAG_LEN + 2);

        let meta = store.head("obj").await.unwrap().unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(store.get_range("obj", 6, 5).await.unwrap(), Bytes::from_static(b"world"));
        assert!(store.get_range("obj", 11, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_multipart_assembles_in_listed_order() {
        let store = MemoryStore::new("weave");
        let body = store.initiate_multipart("obj").await.unwrap();
        let upload_id = multipart::find_element(&body, multipart::UPLOAD_ID_ELEMENT).unwrap();

        let t1 = store.put_part("obj", &upload_id, 1, Bytes::from_static(b"B")).await.unwrap();
        let t0 = store.put_part("obj", &upload_id, 0, Bytes::from_static(b"A")).await.unwrap();
        assert_eq!(store.part_count(&upload_id), 2);

        let t0 = t0.trim_matches('"').to_string();
        let t1 = t1.trim_matches('"').to_string();
        let xml = multipart::render_complete_request(vec![(0, t0.as_str()), (1, t1.as_str())]);
        store.complete_multipart("obj", &upload_id, xml).await.unwrap();

        assert_eq!(store.object("obj").unwrap(), Bytes::from_static(b"AB"));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_order() {
        let store = MemoryStore::new("weave");
        let body = store.initiate_multipart("obj").await.unwrap();
        let upload_id = multipart::find_element(&body, multipart::UPLOAD_ID_ELEMENT).unwrap();
        let t0 = store.put_part("obj", &upload_id, 0, Bytes::from_static(b"A")).await.unwrap();
        let t1 = store.put_part("obj", &upload_id, 1, Bytes::from_static(b"B")).await.unwrap();

        let t0 = t0.trim_matches('"').to_string();
        let t1 = t1.trim_matches('"').to_string();
        let xml = multipart::render_complete_request(vec![(1, t1.as_str()), (0, t0.as_str())]);
        let err = store.complete_multipart("obj", &upload_id, xml).await.unwrap_err();
        assert!(matches!(err, WeaveError::Status { status: 400, .. }));
        assert_eq!(store.open_uploads(), 1);
    }
}
