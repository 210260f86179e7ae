//! Error types for pipetrack.
//!
//! Library crates use [`TrackerError`] via `thiserror`.
//! App crates (cli/tui) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

/// Top-level error type for all pipetrack operations.
///
/// `Clone` so that a single pending fetch can hand its outcome to every
/// caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport failure: connect error, timeout, or non-2xx status.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON or a payload that does not match the wire schema.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The backend answered `success: false`; the message is kept verbatim.
    #[error("{message}")]
    Domain { message: String },

    /// Data validation error (bad identifiers, bad stage numbers, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    /// A control action for this session is already in flight.
    #[error("an action for session {session_id} is already in progress")]
    ActionInFlight { session_id: String },

    /// A retry for this error record is already in flight.
    #[error("a retry for error {error_id} is already in progress")]
    RetryInFlight { error_id: String },

    /// The requested control action is not allowed in the current run state.
    #[error("{action} is not allowed: {reason}")]
    ActionNotAllowed { action: String, reason: String },

    /// A dependent stage cannot be started yet.
    #[error("{stage} cannot be started: {reason}")]
    StageNotReady { stage: String, reason: String },

    /// An operation needed a selected session and none is selected.
    #[error("no session is selected")]
    NoSelection,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// How a view should surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic, non-blocking banner; retried by the next poll or refresh.
    Transport,
    /// Backend message shown verbatim next to the triggering control.
    Domain,
    /// Rejected locally before anything was sent.
    Local,
}

impl TrackerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a domain error carrying the backend's message.
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Classify the error for presentation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Parse { .. } => ErrorKind::Transport,
            Self::Domain { .. } => ErrorKind::Domain,
            _ => ErrorKind::Local,
        }
    }

    /// Whether this is a transport-level failure.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TrackerError::config("missing base url");
        assert_eq!(err.to_string(), "config error: missing base url");

        let err = TrackerError::domain("not retryable");
        assert_eq!(err.to_string(), "not retryable");

        let err = TrackerError::ActionInFlight {
            session_id: "s-1".into(),
        };
        assert!(err.to_string().contains("s-1"));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            TrackerError::Network("timeout".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(TrackerError::parse("bad json").kind(), ErrorKind::Transport);
        assert_eq!(TrackerError::domain("nope").kind(), ErrorKind::Domain);
        assert_eq!(TrackerError::NoSelection.kind(), ErrorKind::Local);
        assert!(!TrackerError::NoSelection.is_transport());
    }
}
