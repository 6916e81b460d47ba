//! Session lifecycle
//!
//! Exactly one participant, the coordinator, asks the store for a new
//! multipart upload and shares the returned id with everyone else.

use bytes::Bytes;
use std::fmt;
use tracing::{debug, info};

use super::{OrAbort, PartAssignment, COORDINATOR_RANK};
use crate::collective::Collective;
use crate::error::{Result, WeaveError};
use crate::storage::multipart::{self, UPLOAD_ID_ELEMENT};
use crate::storage::ObjectStore;

/// Store-issued identity of one multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadId(String);

impl UploadId {
    /// Validate an id; oversized ids are rejected, never truncated
    pub fn new(id: impl Into<String>, max_len: usize) -> Result<Self> {
        let id = id.into();
        if id.len() > max_len {
            return Err(WeaveError::UploadIdTooLong {
                len: id.len(),
                max: max_len,
            });
        }
        Ok(Self(id))
    }

    /// Extract the id from a session-initiate response document
    pub fn from_initiate_response(key: &str, body: &str, max_len: usize) -> Result<Self> {
        let id = multipart::find_element(body, UPLOAD_ID_ELEMENT).ok_or_else(|| {
            WeaveError::MalformedSessionResponse {
                key: key.into(),
                reason: format!("couldn't find '{}' in returned XML", UPLOAD_ID_ELEMENT),
            }
        })?;
        if id.is_empty() {
            return Err(WeaveError::MalformedSessionResponse {
                key: key.into(),
                reason: format!("empty '{}'", UPLOAD_ID_ELEMENT),
            });
        }
        Self::new(id, max_len)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One multipart upload shared by all participants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: String,
    pub upload_id: UploadId,
    pub coordinator: u32,
    pub participants: u32,
    /// Lowest global part number of this upload
    pub first_part: u64,
}

impl Session {
    /// Part numbering shared by every participant of this session
    pub fn assignment(&self) -> PartAssignment {
        PartAssignment::with_first(self.participants, self.first_part)
    }
}

/// Starts sessions and performs the pre-upload reset checks
pub struct SessionCoordinator<'a> {
    store: &'a dyn ObjectStore,
    collective: &'a dyn Collective,
    max_upload_id_len: usize,
    first_part: u64,
}

impl<'a> SessionCoordinator<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        collective: &'a dyn Collective,
        max_upload_id_len: usize,
    ) -> Self {
        Self {
            store,
            collective,
            max_upload_id_len,
            first_part: 0,
        }
    }

    /// Number parts from `first` instead of 0
    pub fn with_first_part_number(mut self, first: u64) -> Self {
        self.first_part = first;
        self
    }

    /// Whether the object must be reset to zero length before writing.
    ///
    /// Truncation always resets; creation resets only if the object is absent.
    pub async fn reset_required(&self, key: &str, truncate: bool, create: bool) -> Result<bool> {
        if truncate {
            return Ok(true);
        }
        if !create {
            return Ok(false);
        }
        let exists = self.store.head(key).await?.is_some();
        Ok(!exists)
    }

    /// Replace the object with zero-length content.
    ///
    /// Writing empty content, rather than deleting, leaves the object present.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.store.put(key, Bytes::new()).await?;
        debug!("Reset {} to zero length", key);
        Ok(())
    }

    /// Collective: every participant returns the same session.
    ///
    /// Only the coordinator resets (when asked) and issues the initiate
    /// request. Calling this twice for one object without finalizing opens a
    /// second, independent upload; the first one is left behind untouched.
    pub async fn begin_session(&self, key: &str, reset_required: bool) -> Result<Session> {
        let rank = self.collective.rank();

        let local_id = if rank == COORDINATOR_RANK {
            self.initiate(key, reset_required)
                .await
                .or_abort(self.collective)?
                .0
        } else {
            String::new()
        };

        let shared = self
            .collective
            .broadcast(Bytes::from(local_id), COORDINATOR_RANK)
            .await
            .or_abort(self.collective)?;
        let upload_id = std::str::from_utf8(&shared)
            .map_err(|e| WeaveError::MalformedSessionResponse {
                key: key.into(),
                reason: format!("broadcast upload id is not UTF-8: {}", e),
            })
            .and_then(|id| UploadId::new(id, self.max_upload_id_len))
            .or_abort(self.collective)?;

        debug!("Rank {} joined upload {} for {}", rank, upload_id, key);
        Ok(Session {
            key: key.into(),
            upload_id,
            coordinator: COORDINATOR_RANK,
            participants: self.collective.size(),
            first_part: self.first_part,
        })
    }

    async fn initiate(&self, key: &str, reset_required: bool) -> Result<UploadId> {
        if reset_required {
            self.reset(key).await?;
        }
        let body = self.store.initiate_multipart(key).await?;
        let upload_id = UploadId::from_initiate_response(key, &body, self.max_upload_id_len)?;
        info!("Initiated multipart upload {} for {}", upload_id, key);
        Ok(upload_id)
    }
}
