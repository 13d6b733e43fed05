//! # Message Codec
//!
//! Converts entity and job events to and from `BrokerMessage`s.
//!
//! ## Entity events
//!
//! | Property | Value |
//! |----------|-------|
//! | `operation` | `insert`, `update` or `delete` |
//! | `entityName` | entity type name, e.g. `Vessel` |
//! | `id` | stringified identifier |
//!
//! The body is the JSON payload when the event carries one, otherwise the
//! JSON of the identifier alone.
//!
//! ## Job events
//!
//! | Property | Value |
//! |----------|-------|
//! | `type` | `job` or `progression` |
//! | `jobId` | job identifier (long) |
//!
//! The body is the JSON of the status or of the progression.

use serde_json::Value;
use sumaris_types::{
    BrokerMessage, EntityEvent, EntityId, EntityOperation, EventError, JobEvent, JobEventKind,
    MessageProperties,
};

use crate::{PROP_ENTITY_NAME, PROP_ID, PROP_JOB_ID, PROP_OPERATION, PROP_TYPE};

// =============================================================================
// ENTITY EVENTS
// =============================================================================

/// Encode an entity event for `destination`.
///
/// # Errors
///
/// Returns [`EventError::BodySerialization`] if the payload cannot be
/// rendered as JSON.
pub fn encode_entity_event(
    event: &EntityEvent,
    destination: &str,
) -> Result<BrokerMessage, EventError> {
    let body = match event.data() {
        Some(data) => serde_json::to_vec(data),
        None => serde_json::to_vec(event.id()),
    }
    .map_err(|e| EventError::BodySerialization(e.to_string()))?;

    let mut properties = MessageProperties::new();
    properties.set_text(PROP_OPERATION, event.operation().as_str());
    properties.set_text(PROP_ENTITY_NAME, event.entity_name());
    properties.set_text(PROP_ID, event.id().to_string());

    Ok(BrokerMessage::new(destination, properties, body))
}

/// Rebuild an entity event from message properties and body.
///
/// A body that is exactly the identifier means the event had no payload.
///
/// # Errors
///
/// Every error is technical: missing or invalid properties, or a body that
/// is not JSON.
pub fn decode_entity_event(message: &BrokerMessage) -> Result<EntityEvent, EventError> {
    let properties = &message.properties;
    let operation: EntityOperation = properties.get_text(PROP_OPERATION)?.parse()?;
    let entity_name = properties.get_text(PROP_ENTITY_NAME)?;
    let id_text = properties.get_text(PROP_ID)?;
    if id_text.is_empty() {
        return Err(EventError::invalid(PROP_ID, id_text));
    }

    let body: Value = serde_json::from_slice(&message.body)
        .map_err(|e| EventError::BodyDeserialization(e.to_string()))?;

    let (id, data) = match body {
        // Text codes that look numeric keep their text form
        Value::String(ref code) if *code == id_text => (EntityId::Text(id_text), None),
        Value::Number(ref n) if n.to_string() == id_text => (EntityId::parse(&id_text), None),
        payload => (EntityId::parse(&id_text), Some(payload)),
    };

    let event = EntityEvent::new(operation, entity_name.as_str(), id)
        .map_err(|_| EventError::invalid(PROP_ENTITY_NAME, entity_name))?;

    Ok(match data {
        Some(payload) => event.with_data(payload),
        None => event,
    })
}

// =============================================================================
// JOB EVENTS
// =============================================================================

/// Encode a job event for `destination`.
///
/// # Errors
///
/// Returns [`EventError::BodySerialization`] if the payload cannot be
/// rendered as JSON.
pub fn encode_job_event(event: &JobEvent, destination: &str) -> Result<BrokerMessage, EventError> {
    let body = match &event.kind {
        JobEventKind::Status(status) => serde_json::to_vec(status),
        JobEventKind::Progression(progression) => serde_json::to_vec(progression),
    }
    .map_err(|e| EventError::BodySerialization(e.to_string()))?;

    let mut properties = MessageProperties::new();
    properties.set_text(PROP_TYPE, event.kind.type_name());
    properties.set_long(PROP_JOB_ID, event.job_id);

    Ok(BrokerMessage::new(destination, properties, body))
}

/// Rebuild a job event from message properties and body.
///
/// # Errors
///
/// Every error is technical: unknown type, missing job id, or a body that
/// does not match the type.
pub fn decode_job_event(message: &BrokerMessage) -> Result<JobEvent, EventError> {
    let properties = &message.properties;
    let job_id = properties.get_long(PROP_JOB_ID)?;
    let type_name = properties.get_text(PROP_TYPE)?;

    let decode_err = |e: serde_json::Error| EventError::BodyDeserialization(e.to_string());
    let kind = match type_name.as_str() {
        "job" => JobEventKind::Status(serde_json::from_slice(&message.body).map_err(decode_err)?),
        "progression" => {
            JobEventKind::Progression(serde_json::from_slice(&message.body).map_err(decode_err)?)
        }
        _ => return Err(EventError::invalid(PROP_TYPE, type_name)),
    };

    Ok(JobEvent { job_id, kind })
}
