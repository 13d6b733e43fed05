//! # Error Types
//!
//! Errors raised while building, encoding or decoding events.

use thiserror::Error;

/// Errors from event construction and the broker message codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A routing property is absent from the message.
    #[error("Missing message property: {name}")]
    MissingProperty { name: String },

    /// A routing property is present but has the wrong type or format.
    #[error("Invalid message property {name}: {value}")]
    InvalidProperty { name: String, value: String },

    /// The operation property does not name a known operation.
    #[error("Unknown entity operation: {0}")]
    UnknownOperation(String),

    /// The entity name is empty.
    #[error("Entity name must not be empty")]
    EmptyEntityName,

    /// The entity name contains the instance key separator.
    #[error("Invalid entity name: {0}")]
    InvalidEntityName(String),

    /// The payload could not be serialized into a message body.
    #[error("Failed to serialize message body: {0}")]
    BodySerialization(String),

    /// The message body is not valid JSON for the expected payload.
    #[error("Failed to deserialize message body: {0}")]
    BodyDeserialization(String),
}

impl EventError {
    /// Returns true for errors caused by a malformed message.
    ///
    /// Technical errors are not recoverable at the consumer boundary: the
    /// message is logged and dropped.
    #[must_use]
    pub fn is_technical(&self) -> bool {
        !matches!(self, Self::EmptyEntityName | Self::InvalidEntityName(_))
    }

    /// Shorthand for [`EventError::MissingProperty`].
    pub fn missing(name: &str) -> Self {
        Self::MissingProperty {
            name: name.to_string(),
        }
    }

    /// Shorthand for [`EventError::InvalidProperty`].
    pub fn invalid(name: &str, value: impl Into<String>) -> Self {
        Self::InvalidProperty {
            name: name.to_string(),
            value: value.into(),
        }
    }
}
