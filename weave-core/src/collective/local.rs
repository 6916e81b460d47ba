//! In-process collective group
//!
//! Participants are tokio tasks sharing one rendezvous table. Every call is
//! a numbered round: each endpoint counts its own calls, deposits its
//! contribution under that number, and waits until all endpoints have
//! deposited. Results are handed out once per participant, then dropped.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error};

use super::{Collective, ReduceOp};
use crate::error::{Result, WeaveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Broadcast(u32),
    Reduce(ReduceOp),
    Gather(u32),
    Barrier,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Broadcast(_) => "broadcast",
            Op::Reduce(_) => "all_reduce",
            Op::Gather(_) => "gather",
            Op::Barrier => "barrier",
        }
    }
}

struct Round {
    op: Op,
    slots: Vec<Option<Bytes>>,
    arrived: u32,
    result: Option<Arc<Vec<Bytes>>>,
    collected: u32,
}

struct Shared {
    size: u32,
    rounds: Mutex<HashMap<u64, Round>>,
    aborted: Mutex<Option<String>>,
    notify: Notify,
}

/// A set of `size` in-process participants
#[derive(Clone)]
pub struct LocalGroup {
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Create a group of `size` participants
    pub fn new(size: u32) -> Self {
        assert!(size > 0, "a collective group needs at least one participant");
        Self {
            shared: Arc::new(Shared {
                size,
                rounds: Mutex::new(HashMap::new()),
                aborted: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Endpoint for one rank. Create each rank's endpoint exactly once.
    pub fn endpoint(&self, rank: u32) -> LocalCollective {
        assert!(rank < self.shared.size, "rank {} out of range", rank);
        LocalCollective {
            rank,
            shared: self.shared.clone(),
            seq: AtomicU64::new(0),
        }
    }

    /// One endpoint per rank, in rank order
    pub fn endpoints(&self) -> Vec<LocalCollective> {
        (0..self.shared.size).map(|rank| self.endpoint(rank)).collect()
    }

    /// Abort reason, if any participant aborted
    pub fn abort_reason(&self) -> Option<String> {
        self.shared.aborted.lock().clone()
    }
}

/// One participant's view of a [`LocalGroup`]
pub struct LocalCollective {
    rank: u32,
    shared: Arc<Shared>,
    seq: AtomicU64,
}

impl LocalCollective {
    fn check_aborted(&self) -> Result<()> {
        match self.shared.aborted.lock().as_ref() {
            Some(reason) => Err(WeaveError::Aborted {
                rank: self.rank,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Deposit `value` for the next round and wait for everyone's values
    async fn exchange(&self, op: Op, value: Bytes) -> Result<Arc<Vec<Bytes>>> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.check_aborted()?;

        let mismatch = {
            let size = self.shared.size;
            let mut rounds = self.shared.rounds.lock();
            let round = rounds.entry(seq).or_insert_with(|| Round {
                op,
                slots: vec![None; size as usize],
                arrived: 0,
                result: None,
                collected: 0,
            });
            if round.op != op {
                Some(round.op)
            } else {
                round.slots[self.rank as usize] = Some(value);
                round.arrived += 1;
                if round.arrived == size {
                    let values = round.slots.iter_mut().map(|s| s.take().unwrap_or_default());
                    round.result = Some(Arc::new(values.collect()));
                    self.shared.notify.notify_waiters();
                }
                None
            }
        };
        if let Some(expected) = mismatch {
            let err = WeaveError::CollectiveMismatch {
                seq,
                expected: expected.name(),
                found: op.name(),
            };
            self.abort(&err.to_string());
            return Err(err);
        }

        loop {
            let notified = self.shared.notify.notified();
            {
                // A completed round is delivered even if someone aborted since.
                let mut rounds = self.shared.rounds.lock();
                if let Some(round) = rounds.get_mut(&seq) {
                    if let Some(result) = round.result.clone() {
                        round.collected += 1;
                        if round.collected == self.shared.size {
                            rounds.remove(&seq);
                        }
                        return Ok(result);
                    }
                }
            }
            self.check_aborted()?;
            notified.await;
        }
    }

    fn root_value(&self, values: &[Bytes], root: u32) -> Result<Bytes> {
        values.get(root as usize).cloned().ok_or_else(|| WeaveError::Config {
            reason: format!("root {} out of range for {} participants", root, self.shared.size),
        })
    }
}

#[async_trait]
impl Collective for LocalCollective {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.shared.size
    }

    async fn broadcast(&self, value: Bytes, root: u32) -> Result<Bytes> {
        let contribution = if self.rank == root { value } else { Bytes::new() };
        let values = self.exchange(Op::Broadcast(root), contribution).await?;
        self.root_value(&values, root)
    }

    async fn all_reduce(&self, value: u64, op: ReduceOp) -> Result<u64> {
        let contribution = Bytes::copy_from_slice(&value.to_le_bytes());
        let values = self.exchange(Op::Reduce(op), contribution).await?;
        Ok(op.apply(values.iter().map(|v| v.clone().get_u64_le())))
    }

    async fn gather(&self, local: Bytes, root: u32) -> Result<Option<Vec<u8>>> {
        let values = self.exchange(Op::Gather(root), local).await?;
        self.root_value(&values, root)?;

        let stride = values[0].len();
        let total: usize = values.iter().map(Bytes::len).sum();
        if values.iter().any(|v| v.len() != stride) {
            return Err(WeaveError::GatherSizeMismatch {
                expected: stride * values.len(),
                actual: total,
            });
        }
        if self.rank != root {
            return Ok(None);
        }

        let mut out = Vec::new();
        out.try_reserve_exact(total)
            .map_err(|_| WeaveError::Resource { bytes: total })?;
        for value in values.iter() {
            out.extend_from_slice(value);
        }
        debug!("Rank {} gathered {} bytes from {} ranks", self.rank, total, values.len());
        Ok(Some(out))
    }

    async fn barrier(&self) -> Result<()> {
        self.exchange(Op::Barrier, Bytes::new()).await.map(|_| ())
    }

    fn abort(&self, reason: &str) {
        {
            let mut aborted = self.shared.aborted.lock();
            if aborted.is_none() {
                error!("Rank {} aborting run: {}", self.rank, reason);
                *aborted = Some(format!("rank {}: {}", self.rank, reason));
            }
        }
        self.shared.notify.notify_waiters();
    }
}
