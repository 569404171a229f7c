//! Error taxonomy for the tracking engine
//!
//! Every error here is scoped to the single message, solve or command that
//! produced it. None of them stop the monitor.

use thiserror::Error;

/// Multilateration failures. The caller falls back to the last known position.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("insufficient anchors: have {available}, need {required}")]
    InsufficientAnchors { available: usize, required: usize },

    #[error("solve failed: {reason}")]
    SolveFailed { reason: String },
}

/// Malformed inbound message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unrecognized topic '{topic}'")]
    UnknownTopic { topic: String },

    #[error("payload is not valid JSON: {details}")]
    InvalidJson { details: String },

    #[error("missing field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid value for '{field}': {details}")]
    InvalidValue { field: String, details: String },
}

/// Errors surfaced by the ingestion monitor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Command or query for a tag that has never reported
    #[error("unknown tag '{tag_id}'")]
    UnknownTag { tag_id: String },
}

pub type MonitorResult<T> = Result<T, MonitorError>;

impl MonitorError {
    pub fn is_decode(&self) -> bool {
        matches!(self, MonitorError::Decode(_))
    }
}
