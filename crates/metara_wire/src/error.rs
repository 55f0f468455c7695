//! Error types for the wire crate.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur interpreting decoded wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A reference or synthetic-id token could not be parsed.
    #[error("malformed wire token: {token:?}")]
    MalformedToken {
        /// The offending token text.
        token: String,
    },
}

impl WireError {
    /// Creates a malformed token error.
    pub fn malformed_token(token: impl Into<String>) -> Self {
        Self::MalformedToken {
            token: token.into(),
        }
    }
}
