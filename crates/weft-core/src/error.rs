//! Error types for the Weft core.
//!
//! The core recognises five error kinds. Every fallible API in this crate
//! returns [`Error`] through the crate-wide [`Result`] alias.
//!
//! | Variant           | Raised when                                            |
//! |-------------------|--------------------------------------------------------|
//! | `InvalidArgument` | Caller violated a documented precondition              |
//! | `Validation`      | Interest, hook ordering, or rule JSON failed checks    |
//! | `NotFound`        | A section, metadata entry, hook, or feature is absent  |
//! | `OperationFailed` | A rule callback, merge, or transition step failed      |
//! | `Cancelled`       | The operation's event token was triggered              |
//!
//! All variants derive `Serialize` so errors can cross a JSON boundary.

use serde::Serialize;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the Weft core.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum Error {
    /// Caller violated a documented precondition (empty key, wrong JSON
    /// shape, double registration).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An object interest, hook ordering graph, or rule description failed
    /// structural checks.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A requested configuration section, metadata entry, hook name, or
    /// plug-in feature is absent.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A rule callback failed, a merge could not proceed, or a transition
    /// step reported failure.
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    /// The operation was aborted because its event's cancellation token was
    /// triggered.
    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed { message: message.into() }
    }

    /// `true` for [`Error::Cancelled`]; used by the dispatcher to demote
    /// cancellation to a debug log instead of a failure notice.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = Error::validation("bad interest");
        assert_eq!(err.to_string(), "validation failed: bad interest");
        assert_eq!(Error::Cancelled.to_string(), "operation was cancelled");
    }

    #[test]
    fn cancellation_is_recognised() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::not_found("x").is_cancellation());
    }

    #[test]
    fn errors_are_serializable() {
        let err = Error::operation_failed("merge failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("merge failed"));
    }
}
