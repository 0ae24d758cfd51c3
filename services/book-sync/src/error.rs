//! Error types for the synchronization engine

use std::time::Duration;
use thiserror::Error;

/// Snapshot fetch failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Exchange throttled us; `retry_after` is the server hint if one was sent
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-supplied wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Exchange does not know the symbol
    #[error("Symbol not found: {0}")]
    NotFound(String),

    /// Network error, 5xx, or unreadable body
    #[error("Transient snapshot error: {0}")]
    Transient(String),

    /// Hard fetch timeout elapsed
    #[error("Snapshot fetch timed out")]
    Timeout,
}

impl SnapshotError {
    /// Whether the orchestrator should keep retrying this symbol
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }

    /// Server-supplied retry hint, if any
    #[must_use]
    pub const fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SnapshotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Malformed or unexpected exchange payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not match the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// A required field is absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A price or quantity could not be parsed
    #[error("Invalid number in {field}: {value}")]
    InvalidNumber {
        /// Field being decoded
        field: &'static str,
        /// Offending text
        value: String,
    },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors surfaced by the orchestrator API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No state exists for the symbol
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Symbol is already tracked
    #[error("Symbol already subscribed: {0}")]
    AlreadySubscribed(String),

    /// Payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Static configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Orchestrator has been stopped
    #[error("Orchestrator stopped")]
    Stopped,
}

/// Result alias for orchestrator operations
pub type SyncResult<T> = Result<T, SyncError>;
