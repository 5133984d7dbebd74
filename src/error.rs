//! Error types for ferroscan

use thiserror::Error;

/// Result type for schedule construction and execution
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for scan construction and execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A scratch buffer could not be allocated while building a schedule.
    ///
    /// Every scratch buffer allocated for the schedule so far has been
    /// released and no request was created.
    #[error("scratch allocation of {requested} bytes failed: {reason}")]
    AllocationFailure {
        /// Size of the refused allocation in bytes
        requested: usize,
        /// Why the pool refused it
        reason: String,
    },

    /// The node layout or sub-group description is malformed
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A step failed while the engine was executing a schedule
    #[error("step {step} failed: {reason}")]
    StepFailure {
        /// Position of the failed step in the schedule (round-major)
        step: usize,
        /// What went wrong
        reason: String,
    },

    /// Invalid rank specified
    #[error("Invalid rank: {0}")]
    InvalidRank(usize),

    /// Caller buffers do not agree on length
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    /// A configuration hint could not be parsed
    #[error("Invalid config value for `{key}`: {value}")]
    InvalidConfig {
        /// Hint key or environment variable
        key: String,
        /// The rejected value
        value: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a step failure for the step at `step`.
    pub fn step(step: usize, reason: impl Into<String>) -> Self {
        Error::StepFailure {
            step,
            reason: reason.into(),
        }
    }

    /// Check that `rank` is a valid rank in a group of `size`.
    pub fn check_rank(rank: usize, size: usize) -> Result<()> {
        if rank < size {
            Ok(())
        } else {
            Err(Error::InvalidRank(rank))
        }
    }

    /// Whether this error was raised while building a schedule, as opposed
    /// to while executing one.
    pub fn is_construction(&self) -> bool {
        !matches!(self, Error::StepFailure { .. })
    }
}
