//! Lockbench Core Library
//!
//! This crate provides the engine behind Lockbench, including:
//! - Resource pool bookkeeping with exclusive holders
//! - Two-phase and incremental acquisition policies
//! - Per-process task state machine with timeouts and staggered restarts
//! - Progress-based deadlock detection and policy-dependent resolution
//! - Throughput, deadlock and waiting-time metrics
//! - TOML configuration and an opt-in event log

pub mod backoff;
pub mod config;
pub mod domain;
pub mod error;
pub mod simulation;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{SimulationConfig, TerminationMode};
    pub use crate::domain::locking::{LockingPolicy, ProcessId, ResourceId};
    pub use crate::error::{Error, Result};
    pub use crate::simulation::{RunSummary, Simulation, StopReason};
}
