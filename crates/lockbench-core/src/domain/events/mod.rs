//! Simulation events
//!
//! A textual side channel recording what happened at each tick. The log is
//! opt-in and plays no part in the engine's correctness.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::locking::{ProcessId, ResourceId};

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A process was created at setup
    ProcessCreated { process: ProcessId },
    /// A resource unit was created at setup
    ResourceCreated { resource: ResourceId },
    /// A process claimed a unit
    Acquired {
        process: ProcessId,
        resource: ResourceId,
    },
    /// A unit was returned to the pool
    Released {
        process: ProcessId,
        resource: ResourceId,
    },
    /// A process gave up its partial holdings after waiting too long
    TimedOut { process: ProcessId, waited: u64 },
    /// A process holds everything it needs and starts its service time
    TaskStarted { process: ProcessId },
    /// A process finished its task
    TaskCompleted { process: ProcessId },
    /// The detector declared a deadlock
    DeadlockDetected { stalled: Vec<ProcessId> },
    /// The resolver forcibly returned units
    DeadlockResolved { released: usize },
}

impl EventKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessCreated { .. } => "process_created",
            Self::ResourceCreated { .. } => "resource_created",
            Self::Acquired { .. } => "acquired",
            Self::Released { .. } => "released",
            Self::TimedOut { .. } => "timed_out",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::DeadlockDetected { .. } => "deadlock_detected",
            Self::DeadlockResolved { .. } => "deadlock_resolved",
        }
    }
}

/// An event stamped with the tick it occurred on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimEvent {
    pub tick: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] ", self.tick)?;
        match &self.kind {
            EventKind::ProcessCreated { process } => write!(f, "{} created", process),
            EventKind::ResourceCreated { resource } => write!(f, "{} created", resource),
            EventKind::Acquired { process, resource } => {
                write!(f, "{} acquired {}", process, resource)
            }
            EventKind::Released { process, resource } => {
                write!(f, "{} released {}", process, resource)
            }
            EventKind::TimedOut { process, waited } => {
                write!(f, "{} timed out after waiting {}", process, waited)
            }
            EventKind::TaskStarted { process } => write!(f, "{} started its task", process),
            EventKind::TaskCompleted { process } => write!(f, "{} completed its task", process),
            EventKind::DeadlockDetected { stalled } => {
                write!(f, "deadlock detected, stalled: ")?;
                for (i, p) in stalled.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                Ok(())
            }
            EventKind::DeadlockResolved { released } => {
                write!(f, "deadlock resolved, {} unit(s) released", released)
            }
        }
    }
}

/// Append-only event recorder
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    enabled: bool,
    events: Vec<SimEvent>,
}

impl EventLog {
    /// Create a log; a disabled log drops everything it is given
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    /// Whether events are being kept
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn recording on or off
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Record an event
    pub fn record(&mut self, tick: u64, kind: EventKind) {
        if self.enabled {
            self.events.push(SimEvent { tick, kind });
        }
    }

    /// All recorded events
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Take the recorded events, leaving the log empty
    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Count recorded events of one type
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind.as_str() == event_type)
            .count()
    }
}
