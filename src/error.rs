//! Error handling for the reconscan engine
//!
//! Fatal problems (bad configuration, missing privileges) are reported through
//! [`ScanError`] before any probe is sent. Per-port failures never abort a
//! session; they are classified as [`ProbeError`] and folded into the result
//! set as `error` entries.

use std::io;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("Unknown technique: {0}")]
    UnknownTechnique(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Tool '{tool}' unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl ScanError {
    /// Whether this error belongs to the configuration class, i.e. it is raised
    /// before probing and no partial session exists.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidPortRange(_)
                | ScanError::UnknownTechnique(_)
                | ScanError::InvalidTarget(_)
                | ScanError::PermissionDenied(_)
                | ScanError::ConfigError(_)
        )
    }

    pub fn tool_unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Cause of a single failed probe.
///
/// `Timeout`, `ConnectionRefused` and `PermissionDenied` are kept apart on
/// purpose: each maps to a different port state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("permission denied")]
    PermissionDenied,

    #[error("{0}")]
    Transport(String),
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ProbeError::ConnectionRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Timeout,
            io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied,
            _ => ProbeError::Transport(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProbeError::Timeout
    }
}

/// Map a raw-socket creation failure to the fatal error class.
pub(crate) fn raw_socket_error(err: io::Error) -> ScanError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        ScanError::PermissionDenied(
            "raw sockets require CAP_NET_RAW or root (syn technique)".to_string(),
        )
    } else {
        ScanError::NetworkError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_distinct_causes() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let other = io::Error::new(io::ErrorKind::Other, "no route to host");

        assert_eq!(ProbeError::from(refused), ProbeError::ConnectionRefused);
        assert_eq!(ProbeError::from(timed_out), ProbeError::Timeout);
        assert_eq!(ProbeError::from(denied), ProbeError::PermissionDenied);
        assert!(matches!(ProbeError::from(other), ProbeError::Transport(msg) if msg.contains("no route")));
    }

    #[test]
    fn configuration_class() {
        assert!(ScanError::InvalidPortRange("0".into()).is_configuration_error());
        assert!(ScanError::PermissionDenied("syn".into()).is_configuration_error());
        assert!(!ScanError::tool_unavailable("nmap", "not installed").is_configuration_error());
        assert!(!ScanError::NetworkError("x".into()).is_configuration_error());
    }

    #[test]
    fn raw_socket_permission_is_fatal_permission_error() {
        let err = raw_socket_error(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, ScanError::PermissionDenied(_)));
    }
}
