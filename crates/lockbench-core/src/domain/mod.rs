//! Domain layer
//!
//! Contains the allocation-and-deadlock engine: the resource pool and
//! allocator, the per-process task machine, the detector, and the metrics
//! aggregator.

pub mod deadlock;
pub mod events;
pub mod locking;
pub mod metrics;
pub mod process;
