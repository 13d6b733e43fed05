//! # Entity Events
//!
//! Notifications about persisted entities, produced by the service that
//! performed the insert, update or delete once its transaction committed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::EventError;

/// Separator between entity name and id in instance keys (`Vessel#12`).
pub const INSTANCE_KEY_SEPARATOR: char = '#';

// =============================================================================
// OPERATION
// =============================================================================

/// The kind of mutation an entity event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityOperation {
    /// A new entity was persisted.
    Insert,
    /// An existing entity was modified.
    Update,
    /// An entity was removed.
    Delete,
}

impl EntityOperation {
    /// All operations, in declaration order.
    pub const ALL: [EntityOperation; 3] = [Self::Insert, Self::Update, Self::Delete];

    /// Lower-case wire form, as carried by the `operation` message property.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EntityOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityOperation {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(EventError::UnknownOperation(s.to_string())),
        }
    }
}

// =============================================================================
// IDENTIFIER
// =============================================================================

/// Identifier of a persisted entity.
///
/// Most entities use a numeric surrogate key; referential tables such as
/// statuses are keyed by a text code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Numeric surrogate key.
    Int(i64),
    /// Text code.
    Text(String),
}

impl EntityId {
    /// Parse a stringified identifier.
    ///
    /// Text that is a valid `i64` becomes [`EntityId::Int`], anything else
    /// is kept verbatim as [`EntityId::Text`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        s.parse::<i64>()
            .map_or_else(|_| Self::Text(s.to_string()), Self::Int)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(code) => f.write_str(code),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for EntityId {
    fn from(code: &str) -> Self {
        Self::Text(code.to_string())
    }
}

impl From<String> for EntityId {
    fn from(code: String) -> Self {
        Self::Text(code)
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// An insert, update or delete notification about one entity.
///
/// Fields are private: an event is immutable once constructed.
/// Deserialization goes through [`EntityEvent::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntityEvent")]
pub struct EntityEvent {
    operation: EntityOperation,
    entity_name: String,
    id: EntityId,
    data: Option<serde_json::Value>,
}

impl EntityEvent {
    /// Build an event without payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyEntityName`] when `entity_name` is blank
    /// and [`EventError::InvalidEntityName`] when it contains the instance
    /// key separator.
    pub fn new(
        operation: EntityOperation,
        entity_name: impl Into<String>,
        id: impl Into<EntityId>,
    ) -> Result<Self, EventError> {
        let entity_name = entity_name.into();
        Self::validate_name(&entity_name)?;
        Ok(Self {
            operation,
            entity_name,
            id: id.into(),
            data: None,
        })
    }

    /// Check that `entity_name` can be routed.
    ///
    /// The name must not be blank and must not contain
    /// [`INSTANCE_KEY_SEPARATOR`], so entity keys never collide with
    /// instance keys.
    ///
    /// # Errors
    ///
    /// Same as [`EntityEvent::new`].
    pub fn validate_name(entity_name: &str) -> Result<(), EventError> {
        if entity_name.trim().is_empty() {
            return Err(EventError::EmptyEntityName);
        }
        if entity_name.contains(INSTANCE_KEY_SEPARATOR) {
            return Err(EventError::InvalidEntityName(entity_name.to_string()));
        }
        Ok(())
    }

    /// Build an insert event.
    pub fn insert(
        entity_name: impl Into<String>,
        id: impl Into<EntityId>,
    ) -> Result<Self, EventError> {
        Self::new(EntityOperation::Insert, entity_name, id)
    }

    /// Build an update event.
    pub fn update(
        entity_name: impl Into<String>,
        id: impl Into<EntityId>,
    ) -> Result<Self, EventError> {
        Self::new(EntityOperation::Update, entity_name, id)
    }

    /// Build a delete event.
    pub fn delete(
        entity_name: impl Into<String>,
        id: impl Into<EntityId>,
    ) -> Result<Self, EventError> {
        Self::new(EntityOperation::Delete, entity_name, id)
    }

    /// Return a copy of this event carrying `data` as payload.
    #[must_use]
    pub fn with_data(self, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }

    #[must_use]
    pub fn operation(&self) -> EntityOperation {
        self.operation
    }

    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The payload, usually the VO of the entity after the change.
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Deserialize the payload into a typed value object.
    ///
    /// Returns `Ok(None)` when the event carries no payload.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>, EventError> {
        self.data
            .as_ref()
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| EventError::BodyDeserialization(e.to_string()))
            })
            .transpose()
    }
}

/// Wire shape of [`EntityEvent`], validated on conversion.
#[derive(Deserialize)]
struct RawEntityEvent {
    operation: EntityOperation,
    entity_name: String,
    id: EntityId,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl TryFrom<RawEntityEvent> for EntityEvent {
    type Error = EventError;

    fn try_from(raw: RawEntityEvent) -> Result<Self, Self::Error> {
        let event = Self::new(raw.operation, raw.entity_name, raw.id)?;
        Ok(match raw.data {
            Some(data) => event.with_data(data),
            None => event,
        })
    }
}

impl fmt::Display for EntityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}#{}", self.operation, self.entity_name, self.id)
    }
}
