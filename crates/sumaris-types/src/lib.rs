//! # SUMARiS Types Crate
//!
//! Domain types that cross the broker boundary: entity events, job events,
//! the `BrokerMessage` envelope and the codec error type.
//!
//! ## Design Principles
//!
//! - **Immutable events**: an `EntityEvent` is built once by the service that
//!   persisted the change and never mutated afterwards.
//! - **Metadata outside the body**: routing data (operation, entity name, id)
//!   travels as message properties so selectors never touch the payload.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod jobs;

pub use entities::{EntityEvent, EntityId, EntityOperation, INSTANCE_KEY_SEPARATOR};
pub use envelope::{BrokerMessage, MessageProperties, PropertyValue};
pub use errors::EventError;
pub use jobs::{JobEvent, JobEventKind, JobProgression, JobStatus};
