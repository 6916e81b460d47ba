//! Error types for Weave
//!
//! Apart from caller mistakes on a single handle, every error here ends the
//! distributed run: a shared multipart upload cannot be repaired by one
//! participant, so callers escalate instead of retrying.

use thiserror::Error;

/// Primary error type for all Weave operations
#[derive(Debug, Error)]
pub enum WeaveError {
    // ========== Transport Errors ==========

    /// Request could not be issued or its body could not be read
    #[error("{op} failed for {key}: {reason}")]
    Transport {
        op: &'static str,
        key: String,
        reason: String,
    },

    /// Store answered with a non-success status
    #[error("{op} failed for {key}: status {status}: {body}")]
    Status {
        op: &'static str,
        key: String,
        status: u16,
        body: String,
    },

    /// Object not found in storage
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    // ========== Protocol Errors ==========

    /// Session-initiate response did not carry an upload id
    #[error("Malformed session response for {key}: {reason}")]
    MalformedSessionResponse { key: String, reason: String },

    /// Upload id longer than the configured limit
    #[error("UploadId length {len} exceeds expected max ({max})")]
    UploadIdTooLong { len: usize, max: usize },

    /// Content tag of unexpected shape
    #[error("Rank {rank}: content tag for part {part_number} has length {len}, expected {expected}")]
    InvalidContentTag {
        rank: u32,
        part_number: u64,
        len: usize,
        expected: usize,
    },

    /// Participants wrote different numbers of parts
    #[error("Rank {rank}: tag count mismatch: local {local}, min {min}, max {max}")]
    LedgerLengthMismatch {
        rank: u32,
        local: u64,
        min: u64,
        max: u64,
    },

    /// Completion document is not the contiguous ascending part range
    #[error("Part ordering violated: expected part {expected}, found {found}")]
    PartOrdering { expected: u64, found: u64 },

    /// Gathered tag data does not match participants x ledger length
    #[error("Gathered {actual} bytes of tag data, expected {expected}")]
    GatherSizeMismatch { expected: usize, actual: usize },

    /// Coordinator reached finalize without the gathered tags
    #[error("Coordinator rank {rank} has no gathered tags to finalize")]
    MissingTags { rank: u32 },

    /// Participants issued different collectives at the same step
    #[error("Collective mismatch at step {seq}: {expected} vs {found}")]
    CollectiveMismatch {
        seq: u64,
        expected: &'static str,
        found: &'static str,
    },

    /// Operation needs an open multipart session
    #[error("No multipart session open for {key}")]
    NoSession { key: String },

    /// Operation not allowed for the handle's access mode
    #[error("Invalid access for {key}: {reason}")]
    InvalidAccess { key: String, reason: String },

    // ========== Resource Errors ==========

    /// Could not allocate a buffer
    #[error("Failed to allocate {bytes} bytes")]
    Resource { bytes: usize },

    // ========== Run Errors ==========

    /// The distributed run was aborted by some participant
    #[error("Run aborted (observed by rank {rank}): {reason}")]
    Aborted { rank: u32, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl WeaveError {
    /// Returns true for failures reported by (or on the way to) the store
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            WeaveError::Transport { .. }
                | WeaveError::Status { .. }
                | WeaveError::ObjectNotFound { .. }
        )
    }

    /// Returns true for violations of the upload protocol itself
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            WeaveError::MalformedSessionResponse { .. }
                | WeaveError::UploadIdTooLong { .. }
                | WeaveError::InvalidContentTag { .. }
                | WeaveError::LedgerLengthMismatch { .. }
                | WeaveError::PartOrdering { .. }
                | WeaveError::GatherSizeMismatch { .. }
                | WeaveError::MissingTags { .. }
                | WeaveError::CollectiveMismatch { .. }
                | WeaveError::NoSession { .. }
        )
    }

    /// Returns true if the error ends the distributed run.
    ///
    /// Only caller mistakes on a single handle are local.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WeaveError::InvalidAccess { .. } | WeaveError::Config { .. })
    }
}

/// Result type alias for Weave operations
pub type Result<T> = std::result::Result<T, WeaveError>;
