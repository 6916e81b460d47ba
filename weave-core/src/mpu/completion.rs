//! Completion document and finalize
//!
//! Gathered tags are grouped by rank; the document walks them local counter
//! first, rank second, which is exactly ascending global part order.

use tracing::info;

use super::ledger::{ContentTag, GatheredTags};
use super::part::PartAssignment;
use super::session::Session;
use super::OrAbort;
use crate::collective::Collective;
use crate::error::{Result, WeaveError};
use crate::storage::multipart;
use crate::storage::ObjectStore;

/// One entry of the completion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u64,
    pub tag: ContentTag,
}

/// Ordered (part number, tag) list submitted to finalize an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionDocument {
    parts: Vec<CompletedPart>,
}

impl CompletionDocument {
    /// Interleave per-rank ledgers into global part order
    pub fn build(gathered: &GatheredTags, assignment: &PartAssignment) -> Result<Self> {
        if gathered.participants() != assignment.participants() {
            return Err(WeaveError::GatherSizeMismatch {
                expected: assignment.participants() as usize,
                actual: gathered.participants() as usize,
            });
        }

        let total = assignment.total_parts(gathered.per_rank());
        let mut parts = Vec::new();
        parts
            .try_reserve_exact(total as usize)
            .map_err(|_| WeaveError::Resource {
                bytes: total as usize * std::mem::size_of::<CompletedPart>(),
            })?;

        for local in 0..gathered.per_rank() {
            for rank in 0..assignment.participants() {
                let tag = gathered
                    .tag(rank, local)
                    .ok_or(WeaveError::MissingTags { rank })?;
                parts.push(CompletedPart {
                    part_number: assignment.global(rank, local),
                    tag,
                });
            }
        }

        let document = Self { parts };
        document.validate(assignment.first())?;
        Ok(document)
    }

    /// Wrap an explicit part list, unchecked
    pub fn from_parts(parts: Vec<CompletedPart>) -> Self {
        Self { parts }
    }

    /// Every part number from `first` on, exactly once, ascending
    pub fn validate(&self, first: u64) -> Result<()> {
        for (index, part) in self.parts.iter().enumerate() {
            let expected = first + index as u64;
            if part.part_number != expected {
                return Err(WeaveError::PartOrdering {
                    expected,
                    found: part.part_number,
                });
            }
        }
        Ok(())
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the store's completion request body
    pub fn to_xml(&self) -> String {
        multipart::render_complete_request(
            self.parts.iter().map(|p| (p.part_number, p.tag.as_str())),
        )
    }
}

/// Submits the completion request and releases everyone afterwards
pub struct CompletionBuilder<'a> {
    store: &'a dyn ObjectStore,
    collective: &'a dyn Collective,
}

impl<'a> CompletionBuilder<'a> {
    pub fn new(store: &'a dyn ObjectStore, collective: &'a dyn Collective) -> Self {
        Self { store, collective }
    }

    /// Collective: the coordinator finalizes, then all pass a barrier.
    ///
    /// Nobody returns before the finalized object is visible in the store.
    pub async fn finalize(&self, session: &Session, gathered: Option<&GatheredTags>) -> Result<()> {
        let rank = self.collective.rank();
        if rank == session.coordinator {
            self.complete(session, gathered)
                .await
                .or_abort(self.collective)?;
        }

        self.collective.barrier().await.or_abort(self.collective)
    }

    async fn complete(&self, session: &Session, gathered: Option<&GatheredTags>) -> Result<()> {
        let rank = self.collective.rank();
        let gathered = gathered.ok_or(WeaveError::MissingTags { rank })?;
        let document = CompletionDocument::build(gathered, &session.assignment())?;

        self.store
            .complete_multipart(&session.key, session.upload_id.as_str(), document.to_xml())
            .await?;
        info!(
            "Finalized upload {} for {} with {} parts",
            session.upload_id,
            session.key,
            document.len()
        );
        Ok(())
    }
}
