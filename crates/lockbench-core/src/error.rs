//! Error types for Lockbench

use thiserror::Error;

use crate::domain::locking::PoolError;

/// Result type alias using Lockbench's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lockbench error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Capacity errors (E100-E199)
    #[error(
        "Pool of {pool_size} unit(s) cannot satisfy tasks that require {required}. Increase workload.pool_size or lower workload.required_per_task."
    )]
    InsufficientCapacity { pool_size: usize, required: usize },

    #[error("Backoff range must be positive, got {0}. Set locking.backoff_range to at least 1.")]
    InvalidBackoffRange(u32),

    // Pool errors (E300-E399)
    #[error(transparent)]
    Pool(#[from] PoolError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    Config(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Invariant errors (E900-E999)
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCapacity { .. } => "E100",
            Self::InvalidBackoffRange(_) => "E101",
            Self::Pool(inner) => inner.code(),
            Self::Config(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::InvariantViolation(_) => "E900",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InsufficientCapacity { required, .. } => {
                Some(format!("lockbench config set workload.pool_size {}", required))
            }
            Self::InvalidBackoffRange(_) => {
                Some("lockbench config set locking.backoff_range 1".to_string())
            }
            Self::Config(_) => Some("lockbench config show".to_string()),
            _ => None,
        }
    }

    /// Whether this error halts a run before the first step
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::InsufficientCapacity { .. } | Self::InvalidBackoffRange(_) | Self::Config(_)
        )
    }
}
