//! Cooperative multipart upload protocol
//!
//! Session start (coordinator initiates, broadcasts the upload id), per-worker
//! part transfer with tag capture, collective tag gathering, and the
//! coordinator's completion request followed by a barrier.

pub mod aggregate;
pub mod completion;
pub mod ledger;
pub mod part;
pub mod session;
pub mod transfer;

use tracing::error;

use crate::collective::Collective;
use crate::error::{Result, WeaveError};

pub use aggregate::TagAggregator;
pub use completion::{CompletedPart, CompletionBuilder, CompletionDocument};
pub use ledger::{ContentTag, FixedWidthRecords, GatheredTags, TagLedger, TagRecord};
pub use part::PartAssignment;
pub use session::{Session, SessionCoordinator, UploadId};
pub use transfer::{PartTransferEngine, UploadContext};

/// Rank that initiates and finalizes every session
pub const COORDINATOR_RANK: u32 = 0;

/// Escalate a failed protocol step to the whole run
pub(crate) trait OrAbort<T> {
    fn or_abort(self, collective: &dyn Collective) -> Result<T>;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self, collective: &dyn Collective) -> Result<T> {
        if let Err(err) = &self {
            if err.is_fatal() && !matches!(err, WeaveError::Aborted { .. }) {
                error!("Rank {}: {}", collective.rank(), err);
                collective.abort(&err.to_string());
            }
        }
        self
    }
}
