//! Close-time tag aggregation
//!
//! Every participant must have written the same number of parts; only then
//! is a positional gather of equal-length ledgers meaningful.

use tracing::debug;

use super::ledger::{GatheredTags, TagLedger};
use super::{OrAbort, COORDINATOR_RANK};
use crate::collective::{Collective, ReduceOp};
use crate::error::{Result, WeaveError};

/// Collects every participant's ledger on the coordinator
pub struct TagAggregator<'a> {
    collective: &'a dyn Collective,
}

impl<'a> TagAggregator<'a> {
    pub fn new(collective: &'a dyn Collective) -> Self {
        Self { collective }
    }

    /// Collective: the coordinator gets every ledger, others get `None`.
    ///
    /// Ledger lengths are reduced first, so a mismatch fails on every
    /// participant before any tag data moves.
    pub async fn gather_tags(&self, ledger: &TagLedger) -> Result<Option<GatheredTags>> {
        let rank = self.collective.rank();
        let local = ledger.len();

        let max = self
            .collective
            .all_reduce(local, ReduceOp::Max)
            .await
            .or_abort(self.collective)?;
        let min = self
            .collective
            .all_reduce(local, ReduceOp::Min)
            .await
            .or_abort(self.collective)?;
        if min != max {
            return Err(WeaveError::LedgerLengthMismatch {
                rank,
                local,
                min,
                max,
            })
            .or_abort(self.collective);
        }

        let gathered = self
            .collective
            .gather(ledger.to_bytes(), COORDINATOR_RANK)
            .await
            .or_abort(self.collective)?;

        match gathered {
            Some(data) => {
                debug!("Rank {}: gathered {} tags from all ranks", rank, local);
                GatheredTags::new(data, self.collective.size(), local)
                    .map(Some)
                    .or_abort(self.collective)
            }
            None => Ok(None),
        }
    }
}
