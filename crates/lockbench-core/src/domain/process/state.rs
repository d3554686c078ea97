//! Process lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a process is in its task cycle
///
/// ```text
/// Idle -> Requesting -> (PartialHold) -> FullHold -> Performing -> Completed -> Idle
///            ^                |
///            +-- timeout -----+          Backoff: staggered restart after a
///                                        deadlock resolution
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Between tasks, nothing requested yet
    #[default]
    Idle,
    /// Waiting for a rescheduled start tick
    Backoff,
    /// Requesting units while holding none
    Requesting,
    /// Holding some but not all required units
    PartialHold,
    /// Holding every required unit, service not yet started
    FullHold,
    /// Holding every required unit and counting down service time
    Performing,
    /// Task finished
    Completed,
}

impl ProcessState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Backoff => "backoff",
            Self::Requesting => "requesting",
            Self::PartialHold => "partial_hold",
            Self::FullHold => "full_hold",
            Self::Performing => "performing",
            Self::Completed => "completed",
        }
    }

    /// Whether the process is blocked waiting on units
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Requesting | Self::PartialHold)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ProcessState::PartialHold.to_string(), "partial_hold");
        assert_eq!(ProcessState::default(), ProcessState::Idle);
    }

    #[test]
    fn test_waiting_states() {
        assert!(ProcessState::Requesting.is_waiting());
        assert!(ProcessState::PartialHold.is_waiting());
        assert!(!ProcessState::Performing.is_waiting());
        assert!(!ProcessState::Backoff.is_waiting());
    }
}
