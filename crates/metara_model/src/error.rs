//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while resolving types or reading entity nodes.
///
/// Every variant except [`ModelError::Protocol`] is a *local data error*:
/// the caller asked for something the local object graph cannot answer.
/// `Protocol` marks a remote payload that violated the wire contract and
/// is escalated to a fatal remote error by the client layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// A bare type name is not in the core registry.
    #[error("unregistered type name: {name:?}")]
    UnregisteredType {
        /// The unknown wire name.
        name: String,
    },

    /// A field was read that the governing projection never requested.
    ///
    /// Distinct from a requested field the server populated as null.
    #[error("field {field:?} of {type_name} was not requested and is absent")]
    AbsentField {
        /// Wire name of the entity type.
        type_name: String,
        /// The absent field.
        field: String,
    },

    /// A field holds a different kind of value than the accessor expects.
    #[error("field {field:?} is {actual}, expected {expected}")]
    WrongFieldType {
        /// The field that was read.
        field: String,
        /// What the accessor expected.
        expected: &'static str,
        /// What is actually stored.
        actual: &'static str,
    },

    /// A scalar setter was given a list or map value.
    #[error("field {field:?} cannot be set to a non-primitive value")]
    NotPrimitive {
        /// The field being set.
        field: String,
    },

    /// A persisted entity was fetched without its id and cannot be
    /// referenced or re-persisted.
    #[error("entity of type {type_name} was fetched without its id")]
    UnkeyedEntity {
        /// Wire name of the entity type.
        type_name: String,
    },

    /// The remote payload violated the wire contract.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },
}

impl ModelError {
    /// Creates an unregistered type error.
    pub fn unregistered_type(name: impl Into<String>) -> Self {
        Self::UnregisteredType { name: name.into() }
    }

    /// Creates an absent field error.
    pub fn absent_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::AbsentField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
