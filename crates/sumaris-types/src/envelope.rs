//! # `BrokerMessage` Envelope
//!
//! The unit exchanged with a message broker.
//!
//! ## Layout
//!
//! - **Header**: message id, destination, creation timestamp.
//! - **Properties**: typed routing metadata that brokers evaluate in
//!   selectors without deserializing the body.
//! - **Body**: opaque bytes (JSON for every event this workspace produces).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use uuid::Uuid;

use crate::errors::EventError;

/// A typed message property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// String property.
    Text(String),
    /// Long (64-bit integer) property.
    Long(i64),
}

impl PropertyValue {
    /// Render the value the way a selector compares it.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Long(n) => n.to_string(),
        }
    }
}

/// Ordered map of message properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties(BTreeMap<String, PropertyValue>);

impl MessageProperties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string property, replacing any previous value.
    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .insert(name.to_string(), PropertyValue::Text(value.into()));
    }

    /// Set a long property, replacing any previous value.
    pub fn set_long(&mut self, name: &str, value: i64) {
        self.0.insert(name.to_string(), PropertyValue::Long(value));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    /// Read a required string property.
    ///
    /// Long properties are rendered in decimal.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::MissingProperty`] when absent.
    pub fn get_text(&self, name: &str) -> Result<String, EventError> {
        self.0
            .get(name)
            .map(PropertyValue::as_text)
            .ok_or_else(|| EventError::missing(name))
    }

    /// Read a required long property.
    ///
    /// String properties holding a decimal integer are accepted.
    ///
    /// # Errors
    ///
    /// - [`EventError::MissingProperty`] when absent
    /// - [`EventError::InvalidProperty`] when not an integer
    pub fn get_long(&self, name: &str) -> Result<i64, EventError> {
        match self.0.get(name) {
            Some(PropertyValue::Long(n)) => Ok(*n),
            Some(PropertyValue::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| EventError::invalid(name, s.as_str())),
            None => Err(EventError::missing(name)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A message handed to, or received from, a broker destination.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Unique message identifier.
    pub message_id: Uuid,

    /// Destination (topic) name.
    pub destination: String,

    /// Unix timestamp (seconds) when the message was created.
    pub timestamp: u64,

    /// Routing metadata.
    pub properties: MessageProperties,

    /// Serialized payload.
    #[serde_as(as = "Bytes")]
    pub body: Vec<u8>,
}

impl BrokerMessage {
    /// Create a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(destination: impl Into<String>, properties: MessageProperties, body: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            destination: destination.into(),
            timestamp: current_timestamp(),
            properties,
            body,
        }
    }

    /// Body size in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
