//! # Message Selectors
//!
//! Broker-side filters evaluated on message properties only, so consumers
//! can subscribe to a subset of a destination without deserializing bodies.

use sumaris_types::{EntityOperation, MessageProperties};

use crate::{PROP_ENTITY_NAME, PROP_OPERATION};

/// Filter for subscribing to specific messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSelector {
    /// Operations to include. Empty means all operations.
    pub operations: Vec<EntityOperation>,
    /// Entity names to include. Empty means all entities.
    pub entity_names: Vec<String>,
    /// Extra `property = value` conditions, all of which must hold.
    pub properties: Vec<(String, String)>,
}

impl MessageSelector {
    /// Create a selector that accepts all messages.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a selector for specific operations.
    #[must_use]
    pub fn operations(operations: Vec<EntityOperation>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    /// Create a selector for a single operation.
    #[must_use]
    pub fn for_operation(operation: EntityOperation) -> Self {
        Self::operations(vec![operation])
    }

    /// Create a selector for specific entity names.
    #[must_use]
    pub fn entities<I, S>(entity_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_names: entity_names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a `name = value` property condition.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Check if a message with these properties matches this selector.
    ///
    /// A condition on an absent property never matches.
    #[must_use]
    pub fn matches(&self, properties: &MessageProperties) -> bool {
        let operation_match = self.operations.is_empty()
            || properties
                .get_text(PROP_OPERATION)
                .ok()
                .and_then(|op| op.parse::<EntityOperation>().ok())
                .is_some_and(|op| self.operations.contains(&op));

        let entity_match = self.entity_names.is_empty()
            || properties
                .get_text(PROP_ENTITY_NAME)
                .is_ok_and(|name| self.entity_names.contains(&name));

        let property_match = self.properties.iter().all(|(name, expected)| {
            properties
                .get(name)
                .is_some_and(|value| value.as_text() == *expected)
        });

        operation_match && entity_match && property_match
    }
}
