//! # SUMARiS Events - Entity-Event Distribution
//!
//! Propagates domain mutations (insert/update/delete) from the transactional
//! core to in-process listeners and to a message broker, so that other
//! application instances can react without polling.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  commit()   ┌──────────────┐   send()   ┌──────────────┐
//! │ Transaction  │ ──────────→ │   Producer   │ ─────────→ │    Broker    │
//! │    Scope     │             │ (ordered Q)  │            │ entity-event │
//! └──────────────┘             └──────────────┘            └──────────────┘
//!                                                                 │ selector
//!                                                                 ▼
//!                  ┌──────────────┐  lookup   ┌──────────────┐
//!                  │  Listeners   │ ←──────── │   Consumer   │
//!                  │ Vessel#12,   │           │ update/delete│
//!                  │ Vessel       │           └──────────────┘
//!                  └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **After commit only:** events queued in a `TransactionScope` are
//!   discarded on rollback.
//! - **Per-producer order:** a single worker drains each producer queue.
//! - **Listener isolation:** a failing or panicking listener never prevents
//!   its siblings from being notified.
//! - **Metadata routing:** operation, entity name and id travel as message
//!   properties; selectors never deserialize the body.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod jobs;
pub mod listener;
pub mod producer;
pub mod registry;
pub mod selector;
pub mod service;
pub mod subscription;
pub mod transaction;

// Re-export main types
pub use broker::{BrokerError, InMemoryBroker, MessageBroker};
pub use config::{ConfigError, EventsConfig};
pub use consumer::{DispatchOutcome, EntityEventConsumer};
pub use jobs::{JobEventConsumer, JobEventListener, JobEventProducer};
pub use listener::{EntityEventListener, FnListener};
pub use producer::EntityEventProducer;
pub use registry::{entity_key, instance_key, ListenerRegistration, ListenerRegistry};
pub use selector::MessageSelector;
pub use service::EntityEventService;
pub use subscription::{BrokerSubscription, MessageStream, SubscriptionError};
pub use transaction::TransactionScope;

pub use sumaris_types::{
    BrokerMessage, EntityEvent, EntityId, EntityOperation, EventError, JobEvent, JobEventKind,
    JobProgression, JobStatus, MessageProperties, PropertyValue,
};

/// Destination carrying entity events.
pub const ENTITY_EVENT_DESTINATION: &str = "entity-event";

/// Destination carrying job events.
pub const JOB_EVENT_DESTINATION: &str = "job-event";

/// Message property holding the lower-cased operation.
pub const PROP_OPERATION: &str = "operation";

/// Message property holding the entity name.
pub const PROP_ENTITY_NAME: &str = "entityName";

/// Message property holding the stringified entity id.
pub const PROP_ID: &str = "id";

/// Message property holding the job id.
pub const PROP_JOB_ID: &str = "jobId";

/// Message property holding the job event type (`job` or `progression`).
pub const PROP_TYPE: &str = "type";

/// Maximum messages to buffer per destination before slow subscribers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
