use thiserror::Error;

use crate::types::{EventId, MatchId};

/// Failures surfaced by bracket operations.
///
/// Every variant is raised before the enclosing transaction commits, so a
/// caller that sees an error can assume no state was written.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BracketError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("swiss round {round} could not be paired: {reason}")]
    PairingFailed { round: u32, reason: String },

    #[error("could not resolve next slot from {match_number}: {reason}")]
    SlotResolutionFailed { match_number: String, reason: String },

    #[error("event {event_id} changed concurrently (expected version {expected}, found {found})")]
    Conflict {
        event_id: EventId,
        expected: u64,
        found: u64,
    },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl BracketError {
    pub fn validation(message: impl Into<String>) -> Self {
        BracketError::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        BracketError::InvalidState(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{key} has an invalid value: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("config format is invalid: {0}")]
    Format(#[from] BracketError),
}
