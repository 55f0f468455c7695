//! Error types for the client crate.
//!
//! The taxonomy matters to callers:
//! - `Data`: a local data error; the caller asked for something the
//!   local object graph cannot answer
//! - `Misuse`: a programmer error (e.g. a foreign node passed to an
//!   update), never a data error
//! - `Protocol`: a fatal remote-protocol violation; never retried here
//! - `Transport`: opaque transport failure, propagated unchanged
//! - `NewReference`: a reference to a not-yet-persisted entity with no
//!   synthetic id to serialize it under

use metara_model::ModelError;
use metara_wire::WireError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the remote data-access layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Local data error from the object model.
    #[error("data error: {0}")]
    Data(#[source] ModelError),

    /// The caller misused the API.
    #[error("misuse: {message}")]
    Misuse {
        /// What the caller did wrong.
        message: String,
    },

    /// The remote response violated the wire contract.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The transport failed; the message is opaque to this layer.
    #[error("transport error: {message}")]
    Transport {
        /// Transport-provided description.
        message: String,
    },

    /// A has-one reference to a new entity had no synthetic id.
    #[error("new-entity reference in field {field:?} has no synthetic id")]
    NewReference {
        /// The field holding the unresolvable reference.
        field: String,
    },
}

impl ClientError {
    /// Creates a misuse error.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl From<ModelError> for ClientError {
    fn from(err: ModelError) -> Self {
        match err {
            // Protocol violations detected during materialization are
            // remote errors, not local data errors.
            ModelError::Protocol { message } => ClientError::Protocol { message },
            other => ClientError::Data(other),
        }
    }
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::Protocol {
            message: err.to_string(),
        }
    }
}
