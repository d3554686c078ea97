//! Process task state machine
//!
//! Each process cycles through requesting units, holding all of them for a
//! fixed service time, and releasing them on completion. Waiting too long
//! surrenders every partial holding so a slow starver cannot block others
//! forever.

pub mod machine;
pub mod state;

pub use machine::{Process, StepOutcome, TaskRules};
pub use state::ProcessState;
