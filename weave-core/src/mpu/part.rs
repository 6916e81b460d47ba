//! Global part numbering
//!
//! `global = first + local * participants + rank`. Injective for a fixed
//! participant count, ordered within a worker, round-robin across workers.
//! No per-write coordination is needed.

/// Maps (rank, local counter) pairs to global part numbers and back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartAssignment {
    participants: u32,
    first: u64,
}

impl PartAssignment {
    /// Numbering for `participants` workers, starting at part 0
    pub fn new(participants: u32) -> Self {
        Self::with_first(participants, 0)
    }

    /// Numbering whose lowest part number is `first`
    pub fn with_first(participants: u32, first: u64) -> Self {
        assert!(participants > 0, "part assignment needs at least one participant");
        Self { participants, first }
    }

    pub fn participants(&self) -> u32 {
        self.participants
    }

    pub fn first(&self) -> u64 {
        self.first
    }

    /// Global part number of `rank`'s `local`-th part
    pub fn global(&self, rank: u32, local: u64) -> u64 {
        debug_assert!(rank < self.participants);
        self.first + local * self.participants as u64 + rank as u64
    }

    /// Inverse of [`global`](Self::global): `(rank, local)`
    pub fn locate(&self, global: u64) -> Option<(u32, u64)> {
        let offset = global.checked_sub(self.first)?;
        let p = self.participants as u64;
        Some(((offset % p) as u32, offset / p))
    }

    /// Number of parts when every participant wrote `per_rank` parts
    pub fn total_parts(&self, per_rank: u64) -> u64 {
        per_rank * self.participants as u64
    }
}
