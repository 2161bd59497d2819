//! Error types for bq-explorer
//!
//! Two layers of errors live here:
//! - [`Error`] is the Rust-level error returned through `Result`. Ordinary
//!   fetch failures never travel this way; it carries configuration problems,
//!   rejected request parameters, I/O failures and invariant violations.
//! - [`UserError`] is the status shown to the end user when a fetch, a
//!   pagination run or an export fails. It pairs a user-friendly message with
//!   a detailed message meant for support, and is delivered through the
//!   session's event channel rather than as a return value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for bq-explorer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bq-explorer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "row_limit")
        key: Option<String>,
    },

    /// A request parameter failed client-side validation
    #[error("invalid {field}: {message}")]
    InvalidRequest {
        /// Wire name of the offending field (e.g., "rowCount")
        field: &'static str,
        /// What is wrong with the value
        message: String,
    },

    /// Programming invariant violated; never expected in correct operation
    #[error("{0}")]
    Internal(String),

    /// The transport call was abandoned because its cancellation token fired
    #[error("request cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Severity flag shown next to a status message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recoverable condition the user can act on
    Warning,
    /// Failure
    Error,
}

/// Classification of a user-visible failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request parameters, rejected before any network call
    InvalidRequest,
    /// No response within the fetch deadline
    Timeout,
    /// The backend returned a recognized failure payload
    Server,
    /// The response shape was not recognized
    Protocol,
    /// A fetch was requested while another one was in flight
    Overlap,
    /// The cache row ceiling has been reached
    Overlimit,
    /// Invariant violation surfaced to the user
    Internal,
}

impl ErrorKind {
    /// Severity used when displaying errors of this kind
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::Overlap | ErrorKind::Overlimit => {
                Severity::Warning
            }
            ErrorKind::Timeout
            | ErrorKind::Server
            | ErrorKind::Protocol
            | ErrorKind::Internal => Severity::Error,
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Server)
    }
}

pub(crate) const MSG_TIMEOUT_USER: &str = "Could not get data from the backend, it didn't respond in a timely fashion. If the problem persists please contact Support.";
pub(crate) const MSG_TIMEOUT: &str = "Timeout fetching data";
pub(crate) const MSG_OVERLAP_USER: &str =
    "Please wait until already active data request completes.";
pub(crate) const MSG_OVERLAP: &str = "Overlapping fetch rejected";
pub(crate) const MSG_OVERLIMIT_USER: &str = "The limit on the amount of data that can be stored for a query has been reached. Consider using more restrictive query.";
pub(crate) const MSG_OVERLIMIT: &str = "Overlimit fetch rejected";
pub(crate) const MSG_PROTOCOL_USER: &str =
    "Unexpected backend response data, please contact Support.";
pub(crate) const MSG_SERVER_USER: &str = "Could not query the backend database. Please retry later. If the problem persists contact Support";
pub(crate) const MSG_CACHE_REFUSED: &str = "Fetching while over the cache limit";

/// A failure as presented to the end user
///
/// `message` is suitable for display; `detail` is troubleshooting
/// information support can ask the user to copy from the log. Constructing
/// a `UserError` logs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct UserError {
    /// What kind of failure this is
    pub kind: ErrorKind,
    /// User-facing message
    pub message: String,
    /// Detail for support (may be empty)
    pub detail: String,
}

impl UserError {
    /// Create a user error and log it
    pub fn new(kind: ErrorKind, message: impl Into<String>, detail: impl Into<String>) -> Self {
        let err = Self {
            kind,
            message: message.into(),
            detail: detail.into(),
        };

        match kind.severity() {
            Severity::Error => tracing::error!(
                kind = ?err.kind,
                detail = %err.detail,
                "{}",
                err.message
            ),
            Severity::Warning => tracing::warn!(
                kind = ?err.kind,
                detail = %err.detail,
                "{}",
                err.message
            ),
        }

        err
    }

    /// The backend did not respond before the deadline
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, MSG_TIMEOUT_USER, MSG_TIMEOUT)
    }

    /// A second fetch was attempted while one was outstanding
    pub fn overlap() -> Self {
        Self::new(ErrorKind::Overlap, MSG_OVERLAP_USER, MSG_OVERLAP)
    }

    /// The cache ceiling has been reached
    pub fn overlimit() -> Self {
        Self::new(ErrorKind::Overlimit, MSG_OVERLIMIT_USER, MSG_OVERLIMIT)
    }

    /// The backend reported a failure; its message is shown as received
    pub fn server(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::new(ErrorKind::Server, MSG_SERVER_USER, "")
        } else {
            Self::new(ErrorKind::Server, message, "")
        }
    }

    /// The response could not be understood
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, MSG_PROTOCOL_USER, detail)
    }

    /// An invariant was violated while handling a fetch
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message, "")
    }

    /// Severity flag for display
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl From<&Error> for UserError {
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidRequest { .. } => {
                UserError::new(ErrorKind::InvalidRequest, error.to_string(), "")
            }
            Error::Network(e) => UserError::server(format!("Network error: {}", e)),
            other => UserError::internal(other.to_string()),
        }
    }
}
