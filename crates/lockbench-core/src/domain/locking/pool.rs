//! Resource pool bookkeeping
//!
//! The pool is the single owner of holder information. Exclusivity is
//! enforced here, so no caller can make two processes hold the same unit.

use super::types::{PoolError, PoolResult, ProcessId, ResourceId};
use serde::Serialize;
use tracing::debug;

/// A uniquely identified, exclusively owned resource unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceUnit {
    /// Immutable identifier
    pub id: ResourceId,
    /// Current holder, if any
    pub holder: Option<ProcessId>,
}

impl ResourceUnit {
    fn new(id: ResourceId) -> Self {
        Self { id, holder: None }
    }

    /// Whether the unit can be claimed right now
    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }
}

/// Registry of resource units and their holders
#[derive(Debug, Clone)]
pub struct ResourcePool {
    units: Vec<ResourceUnit>,
}

impl ResourcePool {
    /// Create a pool of `size` free units with ids `0..size`
    pub fn new(size: usize) -> Self {
        Self {
            units: (0..size).map(|i| ResourceUnit::new(ResourceId(i))).collect(),
        }
    }

    /// Total number of units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the pool has no units at all
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unheld units in ascending id order
    pub fn available(&self) -> Vec<ResourceId> {
        self.units
            .iter()
            .filter(|u| u.is_free())
            .map(|u| u.id)
            .collect()
    }

    /// Number of unheld units
    pub fn available_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_free()).count()
    }

    /// Current holder of a unit
    pub fn holder(&self, unit: ResourceId) -> PoolResult<Option<ProcessId>> {
        self.units
            .get(unit.index())
            .map(|u| u.holder)
            .ok_or(PoolError::UnknownResource(unit))
    }

    /// Claim a unit for `process` iff it is currently unheld
    pub fn acquire(&mut self, unit: ResourceId, process: ProcessId) -> PoolResult<()> {
        let slot = self
            .units
            .get_mut(unit.index())
            .ok_or(PoolError::UnknownResource(unit))?;

        if let Some(holder) = slot.holder {
            return Err(PoolError::AlreadyHeld {
                resource: unit,
                holder,
            });
        }

        slot.holder = Some(process);
        debug!(resource = %unit, process = %process, "Resource acquired");
        Ok(())
    }

    /// Clear the holder of a unit, returning the previous holder
    ///
    /// Releasing a free or unknown unit is a no-op.
    pub fn release(&mut self, unit: ResourceId) -> Option<ProcessId> {
        let previous = self.units.get_mut(unit.index())?.holder.take();
        if let Some(process) = previous {
            debug!(resource = %unit, process = %process, "Resource released");
        }
        previous
    }

    /// Read-only view of every unit
    pub fn units(&self) -> &[ResourceUnit] {
        &self.units
    }

    /// Units currently held by `process`, in ascending id order
    pub fn held_by(&self, process: ProcessId) -> Vec<ResourceId> {
        self.units
            .iter()
            .filter(|u| u.holder == Some(process))
            .map(|u| u.id)
            .collect()
    }
}
