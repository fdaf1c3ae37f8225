//! Error types for database operations
//!
//! Wraps driver errors and keeps the server error code accessible so callers
//! can classify failures (access denied, deadlock, lock wait timeout) without
//! string matching.

use thiserror::Error;

/// `ER_DBACCESS_DENIED_ERROR`
pub const ER_DBACCESS_DENIED: u16 = 1044;
/// `ER_ACCESS_DENIED_ERROR`
pub const ER_ACCESS_DENIED: u16 = 1045;
/// `ER_LOCK_WAIT_TIMEOUT`
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// `ER_LOCK_DEADLOCK`
pub const ER_LOCK_DEADLOCK: u16 = 1213;
/// `ER_SPECIFIC_ACCESS_DENIED_ERROR`
pub const ER_SPECIFIC_ACCESS_DENIED: u16 = 1227;

/// Errors produced by the session layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection establishment failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Error reported by the driver or the server
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// Query produced a result the caller could not interpret
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// Session is in a state that does not allow the operation
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a malformed-result error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResult(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// The server error code, if this error originated on the server.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::MySql(mysql_async::Error::Server(e)) => Some(e.code),
            _ => None,
        }
    }

    /// True for privilege errors (`ER_ACCESS_DENIED_ERROR` and friends).
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.server_code(),
            Some(ER_ACCESS_DENIED) | Some(ER_DBACCESS_DENIED) | Some(ER_SPECIFIC_ACCESS_DENIED)
        )
    }

    /// True for transient failures that may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::MySql(mysql_async::Error::Io(_)) => true,
            _ => matches!(
                self.server_code(),
                Some(ER_LOCK_DEADLOCK) | Some(ER_LOCK_WAIT_TIMEOUT)
            ),
        }
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
