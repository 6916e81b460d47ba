//! Collective communication between participants
//!
//! Every participant must invoke the same collectives in the same order;
//! each call completes only once all participants have reached it.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use local::{LocalCollective, LocalGroup};

/// Reduction applied by [`Collective::all_reduce`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
}

impl ReduceOp {
    /// Fold a set of contributions
    pub fn apply(self, values: impl IntoIterator<Item = u64>) -> u64 {
        let mut values = values.into_iter();
        let first = values.next().unwrap_or(0);
        values.fold(first, |acc, v| match self {
            ReduceOp::Max => acc.max(v),
            ReduceOp::Min => acc.min(v),
            ReduceOp::Sum => acc.saturating_add(v),
        })
    }
}

/// Blocking collective primitives over a fixed participant set
#[async_trait]
pub trait Collective: Send + Sync {
    /// This participant's index, `0..size()`
    fn rank(&self) -> u32;

    /// Number of participants
    fn size(&self) -> u32;

    /// One-to-all: every participant returns `root`'s value
    async fn broadcast(&self, value: Bytes, root: u32) -> Result<Bytes>;

    /// Reduce one value per participant; every participant gets the result
    async fn all_reduce(&self, value: u64, op: ReduceOp) -> Result<u64>;

    /// All-to-one: `root` receives the rank-ordered concatenation of equally
    /// sized contributions, everyone else receives `None`
    async fn gather(&self, local: Bytes, root: u32) -> Result<Option<Vec<u8>>>;

    /// Wait until every participant arrives
    async fn barrier(&self) -> Result<()>;

    /// Tear down the whole run; pending and later collectives fail
    fn abort(&self, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_ops() {
        assert_eq!(ReduceOp::Max.apply([3, 7, 2]), 7);
        assert_eq!(ReduceOp::Min.apply([3, 7, 2]), 2);
        assert_eq!(ReduceOp::Sum.apply([3, 7, 2]), 12);
        assert_eq!(ReduceOp::Min.apply([]), 0);
    }
}
