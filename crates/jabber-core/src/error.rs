//! Error types for the bridge and its collaborators

use std::time::Duration;

use thiserror::Error;

use crate::types::DirectoryMatch;

/// Malformed input rejected at the API boundary
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("address must not be empty")]
    EmptyAddress,
    #[error("address exceeds {max} characters")]
    AddressTooLong { max: usize },
    #[error("address contains forbidden character '{0}'")]
    AddressForbiddenChar(char),
    #[error("address '{0}' is not of the form local@domain[/resource]")]
    MalformedAddress(String),
    #[error("alias must not be empty")]
    EmptyAlias,
    #[error("alias exceeds {max} characters")]
    AliasTooLong { max: usize },
    #[error("alias '{0}' may only contain letters, digits, '_', '.' and '-'")]
    MalformedAlias(String),
    #[error("message body must not be empty")]
    EmptyBody,
    #[error("message body exceeds {max} characters")]
    BodyTooLong { max: usize },
    #[error("message body contains forbidden character '{0}'")]
    BodyForbiddenChar(char),
    #[error("message body contains control character U+{0:04X}")]
    BodyControlChar(u32),
}

/// Which bridge channel an operation targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Failures of the chat connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("transient connection error: {0}")]
    Transient(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("not connected (state: {0})")]
    NotConnected(String),
}

impl ConnectionError {
    /// Errors that end auto-reconnection and need external intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }
}

/// Directory store failures
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure to turn a recipient string into an address
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no contact matches '{0}'")]
    NoMatch(String),
    #[error("'{query}' is ambiguous, {} contacts match", candidates.len())]
    Ambiguous {
        query: String,
        candidates: Vec<DirectoryMatch>,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors surfaced by bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error(
        "{direction} queue full ({size}/{capacity}), item dropped after waiting {timeout:?}"
    )]
    BackPressure {
        direction: Direction,
        size: usize,
        capacity: usize,
        timeout: Duration,
    },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("dropped inbound content from {from}: {reason}")]
    BestEffortDrop { from: String, reason: ValidationError },
    #[error("invalid bridge configuration: {0}")]
    InvalidConfig(String),
}
