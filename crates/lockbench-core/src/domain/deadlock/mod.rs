//! Deadlock detection and resolution
//!
//! Detection is a periodic progress test rather than a wait-for graph
//! search. Resolution follows the locking policy:
//!
//! - **Two-phase**: every unfinished process surrenders all of its units and
//!   restarts after a staggered backoff
//! - **Incremental**: every unfinished process holding something surrenders
//!   exactly one unit

pub mod detector;

pub use detector::{DeadlockDetector, DeadlockReport, DetectorSettings};
