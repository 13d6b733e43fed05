//! # Events Configuration
//!
//! Destination names, channel sizing and consumer subscriptions, loaded from
//! the environment with defaults for local development.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EntityOperation, DEFAULT_CHANNEL_CAPACITY, ENTITY_EVENT_DESTINATION, JOB_EVENT_DESTINATION};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A destination name is blank.
    #[error("Destination name for {0} must not be empty")]
    EmptyDestination(&'static str),

    /// Entity and job events would share a destination.
    #[error("Entity and job events must use distinct destinations (both are {0})")]
    SharedDestination(String),

    /// Channel capacity is zero.
    #[error("Channel capacity must be greater than zero")]
    ZeroCapacity,

    /// An environment variable holds an unparseable value.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Entity-event bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Master switch. When false, producers are silent no-ops and no
    /// consumer is started.
    pub enabled: bool,
    /// Destination for entity events.
    pub entity_destination: String,
    /// Destination for job events.
    pub job_destination: String,
    /// Per-destination buffer of the in-memory broker.
    pub channel_capacity: usize,
    /// Operations the entity consumer subscribes to.
    pub consumer_operations: Vec<EntityOperation>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_destination: ENTITY_EVENT_DESTINATION.to_string(),
            job_destination: JOB_EVENT_DESTINATION.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            consumer_operations: vec![EntityOperation::Update, EntityOperation::Delete],
        }
    }
}

impl EventsConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SUMARIS_EVENTS_ENABLED`: Master switch (default: true)
    /// - `SUMARIS_ENTITY_DESTINATION`: Entity destination (default: entity-event)
    /// - `SUMARIS_JOB_DESTINATION`: Job destination (default: job-event)
    /// - `SUMARIS_EVENTS_CAPACITY`: Channel capacity (default: 1000)
    /// - `SUMARIS_CONSUMER_OPERATIONS`: Comma-separated operations (default: update,delete)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparseable values, or any
    /// error from [`EventsConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let enabled = match env::var("SUMARIS_EVENTS_ENABLED") {
            Ok(v) => parse_bool("SUMARIS_EVENTS_ENABLED", &v)?,
            Err(_) => defaults.enabled,
        };

        let channel_capacity = match env::var("SUMARIS_EVENTS_CAPACITY") {
            Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "SUMARIS_EVENTS_CAPACITY",
                value: v.clone(),
            })?,
            Err(_) => defaults.channel_capacity,
        };

        let consumer_operations = match env::var("SUMARIS_CONSUMER_OPERATIONS") {
            Ok(v) => parse_operations(&v)?,
            Err(_) => defaults.consumer_operations,
        };

        let config = Self {
            enabled,
            entity_destination: env::var("SUMARIS_ENTITY_DESTINATION")
                .unwrap_or(defaults.entity_destination),
            job_destination: env::var("SUMARIS_JOB_DESTINATION")
                .unwrap_or(defaults.job_destination),
            channel_capacity,
            consumer_operations,
        };
        config.validate()?;
        Ok(config)
    }

    /// Disabled configuration: every producer built from it is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity_destination.trim().is_empty() {
            return Err(ConfigError::EmptyDestination("entity events"));
        }
        if self.job_destination.trim().is_empty() {
            return Err(ConfigError::EmptyDestination("job events"));
        }
        if self.entity_destination == self.job_destination {
            return Err(ConfigError::SharedDestination(self.entity_destination.clone()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_operations(value: &str) -> Result<Vec<EntityOperation>, ConfigError> {
    let mut operations = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let operation = part
            .parse::<EntityOperation>()
            .map_err(|_| ConfigError::InvalidValue {
                var: "SUMARIS_CONSUMER_OPERATIONS",
                value: part.to_string(),
            })?;
        if !operations.contains(&operation) {
            operations.push(operation);
        }
    }
    Ok(operations)
}
