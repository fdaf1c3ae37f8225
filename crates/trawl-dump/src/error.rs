//! Error taxonomy for dump jobs
//!
//! Variants map to the job phases they can abort: configuration problems
//! surface before any side effect, precondition and lock failures before
//! data dumping, worker errors during it. `Cancelled` is reserved for
//! operator interrupts and never wraps another failure.

use thiserror::Error;

/// Errors produced by a dump job.
#[derive(Error, Debug)]
pub enum DumpError {
    /// Bad output URL or conflicting options; raised before any side effect
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing privilege or unsupported server; raised before dumping starts
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Neither the global read lock nor the table-lock fallback could be taken
    #[error("Unable to lock tables: {0}")]
    LockAcquisition(String),

    /// Unfixable compatibility issues under the configured target
    #[error("Compatibility issues were found")]
    Compatibility,

    /// Query failure on a worker session
    #[error("Query failed: {0}")]
    Query(#[from] trawl_sql::Error),

    /// I/O failure on an output file
    #[error("Write failed: {0}")]
    Writer(#[from] std::io::Error),

    /// Manifest serialization failure
    #[error("Metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Operator interrupt; the job shut down cleanly
    #[error("Interrupted by user")]
    Cancelled,

    /// Internal invariant violation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DumpError {
    /// Create an invalid-configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a lock-acquisition error
    pub fn lock_acquisition(msg: impl Into<String>) -> Self {
        Self::LockAcquisition(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True when the job was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for failures that may succeed on retry (deadlocks, timeouts,
    /// broken connections).
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Query(e) => e.is_retriable(),
            Self::Writer(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Result type for dump operations
pub type Result<T> = std::result::Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DumpError::invalid_config("output URL is empty");
        assert!(err.to_string().contains("Invalid configuration"));
        assert!(err.to_string().contains("output URL is empty"));
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(DumpError::Cancelled.is_cancelled());
        assert!(!DumpError::Compatibility.is_cancelled());
    }

    #[test]
    fn test_retriable() {
        assert!(!DumpError::precondition("missing EVENT").is_retriable());
        assert!(!DumpError::Cancelled.is_retriable());

        let io = DumpError::Writer(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow disk",
        ));
        assert!(io.is_retriable());
    }
}
