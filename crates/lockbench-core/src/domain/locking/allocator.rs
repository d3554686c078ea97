//! Resource allocator
//!
//! Applies the active locking policy for one requesting process against the
//! pool. Nothing is attempted while fewer units are free than the process
//! still needs; otherwise candidates are the lowest-id free units. That
//! ordering alone does not rule out circular waits: several processes race
//! for the same low ids and each may end up holding part of what it needs.

use super::pool::ResourcePool;
use super::types::{LockingPolicy, PoolError, ProcessId, ResourceId};
use crate::backoff::Backoff;
use crate::error::{Error, Result};
use tracing::debug;

/// Result of one allocation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// Units claimed this step (possibly none if nothing was needed)
    Claimed(Vec<ResourceId>),
    /// Not enough free units to act on; nothing was claimed
    Insufficient,
    /// Some candidates were already held and skipped; the rest were claimed
    /// and the backoff penalty is added to waiting time
    Contended { claimed: Vec<ResourceId>, penalty: u64 },
}

impl Allocation {
    /// Units claimed by this attempt
    pub fn claimed(&self) -> &[ResourceId] {
        match self {
            Self::Claimed(units) | Self::Contended { claimed: units, .. } => units,
            Self::Insufficient => &[],
        }
    }
}

/// Policy-driven allocator for a fixed required-per-task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocator {
    policy: LockingPolicy,
    required: usize,
}

impl Allocator {
    /// Create an allocator, failing if the pool can never satisfy a task
    pub fn new(policy: LockingPolicy, required: usize, pool_size: usize) -> Result<Self> {
        if pool_size < required {
            return Err(Error::InsufficientCapacity {
                pool_size,
                required,
            });
        }
        Ok(Self { policy, required })
    }

    /// Active locking policy
    pub fn policy(&self) -> LockingPolicy {
        self.policy
    }

    /// Units a task needs simultaneously
    pub fn required(&self) -> usize {
        self.required
    }

    /// Attempt to move `process` closer to a full hold
    ///
    /// `held` is what the process already owns. Claimed units are recorded in
    /// the pool; the caller appends them to its held-set.
    pub fn allocate(
        &self,
        process: ProcessId,
        held: &[ResourceId],
        pool: &mut ResourcePool,
        backoff: &mut Backoff,
    ) -> Result<Allocation> {
        if pool.len() < self.required {
            return Err(Error::InsufficientCapacity {
                pool_size: pool.len(),
                required: self.required,
            });
        }

        let needed = self.required.saturating_sub(held.len());
        if needed == 0 {
            return Ok(Allocation::Claimed(Vec::new()));
        }

        let available = pool.available();
        if available.len() < needed {
            debug!(
                process = %process,
                policy = %self.policy,
                needed,
                free = available.len(),
                "Not enough free units, no action"
            );
            return Ok(Allocation::Insufficient);
        }
        let candidates: Vec<ResourceId> = available.into_iter().take(needed).collect();

        match self.policy {
            LockingPolicy::TwoPhase => Self::allocate_all(process, candidates, pool),
            LockingPolicy::Incremental => {
                Self::allocate_each(process, &candidates, pool, backoff)
            }
        }
    }

    /// Claim every candidate in this step
    fn allocate_all(
        process: ProcessId,
        candidates: Vec<ResourceId>,
        pool: &mut ResourcePool,
    ) -> Result<Allocation> {
        for &unit in &candidates {
            pool.acquire(unit, process)?;
        }
        Ok(Allocation::Claimed(candidates))
    }

    /// Attempt each candidate independently, keeping whatever was claimed
    ///
    /// A candidate held at the instant of the attempt is skipped and costs
    /// one backoff draw.
    fn allocate_each(
        process: ProcessId,
        candidates: &[ResourceId],
        pool: &mut ResourcePool,
        backoff: &mut Backoff,
    ) -> Result<Allocation> {
        let mut claimed = Vec::with_capacity(candidates.len());
        let mut penalty = 0;

        for &unit in candidates {
            match pool.acquire(unit, process) {
                Ok(()) => claimed.push(unit),
                Err(PoolError::AlreadyHeld { holder, .. }) => {
                    let delay = backoff.next_delay();
                    debug!(
                        process = %process,
                        resource = %unit,
                        holder = %holder,
                        delay,
                        "Candidate already held, skipping"
                    );
                    penalty += delay;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if claimed.len() == candidates.len() {
            Ok(Allocation::Claimed(claimed))
        } else {
            Ok(Allocation::Contended { claimed, penalty })
        }
    }
}
