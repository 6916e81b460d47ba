//! Weave Core - cooperative multipart uploads to S3-compatible stores
//!
//! This crate lets a group of workers write one logical object together:
//! - Session start: the coordinator initiates the upload and broadcasts its id
//! - Global part numbering interleaved by rank
//! - Per-worker content tag ledgers, gathered at close
//! - Completion by the coordinator, followed by a barrier
//!
//! A file-per-process layout (plain PUT per worker) is available as well.

pub mod collective;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mpu;
pub mod object;
pub mod storage;

pub use config::{Layout, WeaveConfig};
pub use error::{Result, WeaveError};
pub use object::{Access, ObjectHandle, OpenOptions, Weave};

/// Length of a content tag as returned by the store, quotes stripped
pub const CONTENT_TAG_LEN: usize = 32;

/// Default upper bound on the upload id length
pub const DEFAULT_MAX_UPLOAD_ID_LEN: usize = 256;
