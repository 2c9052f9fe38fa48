//! Engine-wide error handling
//!
//! One taxonomy for the whole core. Errors are values, never control flow:
//! kernel arithmetic saturates instead of panicking, out-of-world queries
//! return the invalid sentinel voxel, and only API-level misuse surfaces
//! here.

use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-power-of-two grid constants, zero-sized worlds, unknown
    /// viscosity tags in API calls
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// API-level indices outside the world. Position queries never raise
    /// this; they report the invalid voxel instead.
    #[error("out of bounds: {what}")]
    OutOfBounds { what: String },

    /// Write attempted while the simulation has not been drained. Reported,
    /// not recovered; the caller must `wait_until_quiescent` first.
    #[error("conflict: {what}")]
    Conflict { what: String },

    /// Allocation failure while creating job or block data. The affected
    /// block keeps its last-known-good state and is retried next tick.
    #[error("resource exhausted: {what}")]
    ResourceExhausted { what: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl EngineError {
    /// Shorthand used by config validation paths
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn out_of_bounds(what: impl Into<String>) -> Self {
        EngineError::OutOfBounds { what: what.into() }
    }
}
