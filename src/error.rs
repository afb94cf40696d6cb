use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that reject a scan before any socket is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid port range {start}-{end}: {reason}")]
    InvalidRange { start: i64, end: i64, reason: &'static str },

    #[error("invalid port range syntax: {0}")]
    InvalidRangeSyntax(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// Failure of the socket-table query itself.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("process inspection unavailable: {0}")]
    Unavailable(String),

    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal problems recorded while attributing an open port.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyIssue {
    #[error("process lookup unavailable: {0}")]
    ProcessLookupUnavailable(String),

    #[error("could not describe process {pid}")]
    ProcessDescribeFailure { pid: u32 },
}
