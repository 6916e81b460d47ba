//! Part transfer engine
//!
//! One REST call per transfer. Shared-object writes become multipart part
//! uploads at their global part number; reads are ranged GETs. Per-worker
//! file writes bypass multipart and replace the object's content, so with a
//! transfer size smaller than the block size only the last write survives.

use bytes::Bytes;
use std::time::Instant;
use tracing::debug;

use super::ledger::{ContentTag, TagLedger, TagRecord};
use super::session::Session;
use crate::error::Result;
use crate::metrics::TransferMetrics;
use crate::storage::ObjectStore;

/// Issues part writes, whole-object writes, and ranged reads
pub struct PartTransferEngine<'a> {
    store: &'a dyn ObjectStore,
    metrics: &'a TransferMetrics,
}

impl<'a> PartTransferEngine<'a> {
    pub fn new(store: &'a dyn ObjectStore, metrics: &'a TransferMetrics) -> Self {
        Self { store, metrics }
    }

    /// Upload `rank`'s `local`-th part and capture its content tag
    pub async fn write_part(
        &self,
        session: &Session,
        local: u64,
        rank: u32,
        data: Bytes,
    ) -> Result<TagRecord> {
        let part_number = session.assignment().global(rank, local);
        let len = data.len() as u64;
        let start = Instant::now();

        let raw = self
            .store
            .put_part(&session.key, session.upload_id.as_str(), part_number, data)
            .await?;
        let tag = ContentTag::parse(&raw, rank, part_number)?;

        self.metrics.part_write_duration.observe(start.elapsed());
        self.metrics.parts_written.inc();
        self.metrics.bytes_written.inc_by(len);
        debug!("Rank {}: part {} = ETag {}", rank, part_number, tag);

        Ok(TagRecord { part_number, tag })
    }

    /// Replace the whole object (per-worker file layout)
    pub async fn replace(&self, key: &str, data: Bytes) -> Result<String> {
        let len = data.len() as u64;
        let etag = self.store.put(key, data).await?;
        self.metrics.bytes_written.inc_by(len);
        Ok(etag)
    }

    /// Read `len` bytes at `offset`
    pub async fn read_range(&self, key: &str, offset: u64, len: u64) -> Result<Bytes> {
        let data = self.store.get_range(key, offset, len).await?;
        self.metrics.bytes_read.inc_by(data.len() as u64);
        debug!("Read {} bytes of {} at offset {}", data.len(), key, offset);
        Ok(data)
    }
}

/// One worker's state within a session: its local part counter and ledger
#[derive(Debug)]
pub struct UploadContext {
    session: Session,
    rank: u32,
    next_local: u64,
    ledger: TagLedger,
}

impl UploadContext {
    pub fn new(session: Session, rank: u32) -> Self {
        Self {
            session,
            rank,
            next_local: 0,
            ledger: TagLedger::new(),
        }
    }

    /// Write the next part and record its tag.
    ///
    /// The counter only advances on success.
    pub async fn write_next(
        &mut self,
        engine: &PartTransferEngine<'_>,
        data: Bytes,
    ) -> Result<TagRecord> {
        let record = engine
            .write_part(&self.session, self.next_local, self.rank, data)
            .await?;
        self.ledger.push(record.tag);
        self.next_local += 1;
        Ok(record)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn ledger(&self) -> &TagLedger {
        &self.ledger
    }

    /// Parts written so far by this worker
    pub fn parts_written(&self) -> u64 {
        self.next_local
    }
}
