//! Error types for taskwatch.
//!
//! All errors are strongly typed using thiserror. Connection failures,
//! terminal task failures and monitor-level conditions (cancellation,
//! undecodable property values) are kept apart so callers can pattern match
//! on what actually went wrong.

use thiserror::Error;

use crate::connection::FilterId;
use crate::task::{ErrorDetail, TaskId};

/// Errors raised by the remote collaborator.
///
/// The monitor never retries these; they abort the run immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Remote endpoint unreachable: {message}")]
    Unreachable {
        message: String,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid filter: {reason}")]
    InvalidFilter {
        reason: String,
    },

    #[error("Unknown filter: {0}")]
    UnknownFilter(FilterId),

    #[error("Invalid version token: {version}")]
    InvalidVersion {
        version: String,
    },

    #[error("Backend error: {message}")]
    Backend {
        message: String,
    },
}

/// The monitored task reached its terminal error state.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Task {task} failed: {cause}")]
pub struct OperationError {
    /// Task that failed.
    pub task: TaskId,
    /// Error detail reported by the remote side, verbatim.
    pub cause: ErrorDetail,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config field '{field}' must not be empty")]
    EmptyPath {
        field: &'static str,
    },

    #[error("Invalid config document: {message}")]
    Parse {
        message: String,
    },
}

/// Top-level error type for taskwatch.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Monitoring of task {task} was cancelled")]
    Cancelled {
        task: TaskId,
    },

    #[error("Could not decode property '{path}': {message}")]
    Decode {
        path: String,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MonitorError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns true if the monitored task itself failed.
    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Returns true if the run was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The task failure cause, if this is an operation error.
    #[must_use]
    pub const fn operation_cause(&self) -> Option<&ErrorDetail> {
        match self {
            Self::Operation(err) => Some(&err.cause),
            _ => None,
        }
    }

    /// Returns true if restarting the monitor could plausibly succeed.
    ///
    /// The monitor itself never retries; this is a hint for callers.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => matches!(e, ConnectionError::Unreachable { .. }),
            Self::Operation(_)
            | Self::Cancelled { .. }
            | Self::Decode { .. }
            | Self::Config(_)
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
