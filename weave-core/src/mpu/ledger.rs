//! Content tags and their per-worker ledger
//!
//! Tags are fixed-width, so a ledger is a flat run of records with no
//! delimiters. That is what lets the coordinator split gathered bytes back
//! into per-rank ledgers by position alone.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::error::{Result, WeaveError};
use crate::CONTENT_TAG_LEN;

/// Opaque content tag returned by the store for one part
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentTag([u8; CONTENT_TAG_LEN]);

impl ContentTag {
    /// Parse a raw tag as returned by the store.
    ///
    /// Surrounding whitespace and one pair of wrapping quotes are stripped.
    /// Anything but exactly [`CONTENT_TAG_LEN`] ASCII characters is
    /// rejected; tags are never truncated or padded.
    pub fn parse(raw: &str, rank: u32, part_number: u64) -> Result<Self> {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(trimmed);

        let invalid = || WeaveError::InvalidContentTag {
            rank,
            part_number,
            len: inner.len(),
            expected: CONTENT_TAG_LEN,
        };
        if !inner.is_ascii() {
            return Err(invalid());
        }
        let bytes: [u8; CONTENT_TAG_LEN] = inner.as_bytes().try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }

    fn from_record(record: &[u8]) -> Option<Self> {
        record.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII is ever admitted.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for ContentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentTag({})", self.as_str())
    }
}

impl fmt::Display for ContentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag captured from one successful part write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord {
    pub part_number: u64,
    pub tag: ContentTag,
}

/// Read-only view of `data` as consecutive records of `stride` bytes
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthRecords<'a> {
    data: &'a [u8],
    stride: usize,
}

impl<'a> FixedWidthRecords<'a> {
    /// Fails unless `data` is a whole number of records
    pub fn new(data: &'a [u8], stride: usize) -> Result<Self> {
        if stride == 0 || data.len() % stride != 0 {
            return Err(WeaveError::GatherSizeMismatch {
                expected: data.len() - data.len() % stride.max(1),
                actual: data.len(),
            });
        }
        Ok(Self { data, stride })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Record at `index`
    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        let start = index.checked_mul(self.stride)?;
        let end = start.checked_add(self.stride)?;
        self.data.get(start..end)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.data.chunks_exact(self.stride)
    }
}

/// Append-only, ordered tags of one worker's parts
#[derive(Debug, Default, Clone)]
pub struct TagLedger {
    records: BytesMut,
}

impl TagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tag of the next part, in local-counter order
    pub fn push(&mut self, tag: ContentTag) {
        self.records.extend_from_slice(tag.as_bytes());
    }

    /// Number of tags recorded
    pub fn len(&self) -> u64 {
        (self.records.len() / CONTENT_TAG_LEN) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tag of the `local`-th part
    pub fn get(&self, local: u64) -> Option<ContentTag> {
        self.view().get(local as usize).and_then(ContentTag::from_record)
    }

    /// Concatenated records, as contributed to the gather
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.records)
    }

    fn view(&self) -> FixedWidthRecords<'_> {
        FixedWidthRecords {
            data: &self.records,
            stride: CONTENT_TAG_LEN,
        }
    }
}

/// Every rank's ledger, as gathered on the coordinator.
///
/// Rank `r`'s ledger occupies records `r * per_rank .. (r + 1) * per_rank`.
#[derive(Debug, Clone)]
pub struct GatheredTags {
    data: Vec<u8>,
    participants: u32,
    per_rank: u64,
}

impl GatheredTags {
    /// Validate the gathered bytes against the expected shape
    pub fn new(data: Vec<u8>, participants: u32, per_rank: u64) -> Result<Self> {
        let expected = usize::try_from(per_rank)
            .ok()
            .and_then(|n| n.checked_mul(participants as usize))
            .and_then(|n| n.checked_mul(CONTENT_TAG_LEN))
            .ok_or(WeaveError::Resource { bytes: usize::MAX })?;
        if data.len() != expected {
            return Err(WeaveError::GatherSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            participants,
            per_rank,
        })
    }

    /// Assemble from in-memory ledgers, one per rank in rank order
    pub fn from_ledgers(ledgers: &[TagLedger]) -> Result<Self> {
        let per_rank = ledgers.first().map(TagLedger::len).unwrap_or(0);
        let mut data = Vec::new();
        for ledger in ledgers {
            data.extend_from_slice(&ledger.records);
        }
        Self::new(data, ledgers.len() as u32, per_rank)
    }

    pub fn participants(&self) -> u32 {
        self.participants
    }

    /// Tags written by each participant
    pub fn per_rank(&self) -> u64 {
        self.per_rank
    }

    /// Tag of `rank`'s `local`-th part
    pub fn tag(&self, rank: u32, local: u64) -> Option<ContentTag> {
        if rank >= self.participants || local >= self.per_rank {
            return None;
        }
        let index = rank as u64 * self.per_rank + local;
        self.records()
            .get(index as usize)
            .and_then(ContentTag::from_record)
    }

    fn records(&self) -> FixedWidthRecords<'_> {
        FixedWidthRecords {
            data: &self.data,
            stride: CONTENT_TAG_LEN,
        }
    }
}
