//! # Entity Event Consumer
//!
//! Receives entity messages from the broker and notifies the listeners
//! registered for the event's instance key and entity key.
//!
//! One subscription is opened per configured operation, each with a
//! property selector, so the broker filters out operations nobody consumes.

use sumaris_telemetry::{log_entity_event, metric_inc, EVENTS_CONSUMED, EVENTS_DROPPED};
use sumaris_types::{BrokerMessage, EntityEvent, EntityOperation, EventError};
use tokio::sync::watch;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{error, info};

use crate::broker::MessageBroker;
use crate::codec::decode_entity_event;
use crate::config::EventsConfig;
use crate::listener::{invoke_isolated, notify, EntityEventListener};
use crate::registry::{entity_key, instance_key, ListenerRegistry};
use crate::selector::MessageSelector;
use crate::subscription::MessageStream;

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Listeners that were called.
    pub invoked: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

impl DispatchOutcome {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }
}

/// Consumer of the entity destination.
pub struct EntityEventConsumer {
    destination: String,
    registry: ListenerRegistry<dyn EntityEventListener>,
    streams: StreamMap<EntityOperation, MessageStream>,
}

impl EntityEventConsumer {
    /// Subscribe to `config.entity_destination` for each of
    /// `config.consumer_operations`.
    ///
    /// Subscriptions are live as soon as this returns; messages sent before
    /// [`EntityEventConsumer::run`] starts are buffered.
    #[must_use]
    pub fn new(
        config: &EventsConfig,
        broker: &dyn MessageBroker,
        registry: ListenerRegistry<dyn EntityEventListener>,
    ) -> Self {
        let mut streams = StreamMap::new();
        for &operation in &config.consumer_operations {
            let subscription = broker.subscribe(
                &config.entity_destination,
                MessageSelector::for_operation(operation),
            );
            streams.insert(operation, subscription.into_stream());
        }

        Self {
            destination: config.entity_destination.clone(),
            registry,
            streams,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Operations this consumer subscribed to.
    #[must_use]
    pub fn operations(&self) -> Vec<EntityOperation> {
        self.streams.keys().copied().collect()
    }

    /// Notify every listener registered for the event.
    ///
    /// Listeners under both the instance key and the entity key are called
    /// once. A failing listener does not prevent the others from running.
    pub fn dispatch(&self, event: &EntityEvent) -> DispatchOutcome {
        let keys = [
            instance_key(event.entity_name(), event.id()),
            entity_key(event.entity_name()),
        ];
        let listeners = self.registry.lookup(&keys);

        let mut outcome = DispatchOutcome {
            invoked: listeners.len(),
            failed: 0,
        };
        for listener in &listeners {
            if !invoke_isolated(event.entity_name(), event, || notify(listener.as_ref(), event)) {
                outcome.failed += 1;
            }
        }

        log_entity_event!(
            debug,
            "Entity event dispatched",
            event,
            invoked = outcome.invoked,
            failed = outcome.failed
        );
        outcome
    }

    /// Decode a broker message and dispatch the resulting event.
    ///
    /// # Errors
    ///
    /// Returns the decoding error for malformed messages; no listener is
    /// called in that case.
    pub fn handle_message(&self, message: &BrokerMessage) -> Result<DispatchOutcome, EventError> {
        let event = decode_entity_event(message)?;
        metric_inc!(EVENTS_CONSUMED, &[&self.destination, event.operation().as_str()]);
        Ok(self.dispatch(&event))
    }

    /// Consume messages until `shutdown` turns true, its sender is dropped,
    /// or every subscription closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut streams = std::mem::take(&mut self.streams);
        let operations: Vec<&str> = streams.keys().map(EntityOperation::as_str).collect();
        info!(
            destination = %self.destination,
            operations = ?operations,
            "Entity event consumer started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                next = streams.next() => {
                    let Some((_operation, message)) = next else {
                        info!(destination = %self.destination, "All entity subscriptions closed");
                        break;
                    };
                    if let Err(e) = self.handle_message(&message) {
                        error!(
                            destination = %self.destination,
                            message_id = %message.message_id,
                            error = %e,
                            "Malformed entity message dropped"
                        );
                        metric_inc!(EVENTS_DROPPED, &[&self.destination, "malformed"]);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(destination = %self.destination, "Entity event consumer stopped");
    }
}
