//! Identifier types, locking policy and pool error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Index of a competing worker in the process arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub usize);

impl ProcessId {
    /// Create a new process identifier
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying arena index
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Index of a resource unit in the pool arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub usize);

impl ResourceId {
    /// Create a new resource identifier
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying arena index
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Resource acquisition discipline
///
/// The same value drives both the allocator (how units are claimed) and the
/// deadlock resolver (how units are taken back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingPolicy {
    /// Claim every required unit in a single step or none at all
    #[default]
    TwoPhase,
    /// Claim one unit per step and keep partial holdings across steps
    Incremental,
}

impl LockingPolicy {
    /// All policies, in comparison order
    pub const ALL: [LockingPolicy; 2] = [Self::TwoPhase, Self::Incremental];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoPhase => "two_phase",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for LockingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "two_phase" | "2pl" => Ok(Self::TwoPhase),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!(
                "Unknown locking policy: {}. Valid options: two_phase, incremental",
                other
            )),
        }
    }
}

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Unit is already held by a process
    #[error("Resource {resource} is already held by {holder}")]
    AlreadyHeld {
        resource: ResourceId,
        holder: ProcessId,
    },

    /// Unit id is outside the pool
    #[error("Resource {0} does not exist in the pool")]
    UnknownResource(ResourceId),

    /// Process id is outside the population
    #[error("Process {0} does not exist")]
    UnknownProcess(ProcessId),
}

impl PoolError {
    /// Get error code for this pool error
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyHeld { .. } => "E301",
            Self::UnknownResource(_) => "E302",
            Self::UnknownProcess(_) => "E303",
        }
    }
}
