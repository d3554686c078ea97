//! Resource pool and allocation policies
//!
//! # Architecture
//!
//! - **Types**: `ProcessId`, `ResourceId`, `LockingPolicy`, `PoolError`
//! - **Pool**: `ResourcePool`, the only place holder information lives
//! - **Allocator**: two-phase (all-or-nothing) and incremental (one unit per
//!   step) acquisition against the pool
//!
//! Processes and units refer to each other only through arena indices, so a
//! release can never leave a dangling reference behind.

pub mod allocator;
pub mod pool;
pub mod types;

// Re-export main types
pub use allocator::{Allocation, Allocator};
pub use pool::{ResourcePool, ResourceUnit};
pub use types::{LockingPolicy, PoolError, PoolResult, ProcessId, ResourceId};
