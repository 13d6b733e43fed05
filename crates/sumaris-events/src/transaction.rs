//! # Transaction Scope
//!
//! Buffers entity events raised inside a unit of work and hands them to the
//! producer only when the work commits. A rolled back or abandoned scope
//! publishes nothing.

use sumaris_telemetry::EVENTS_DROPPED;
use sumaris_types::EntityEvent;
use tracing::debug;

use crate::producer::EntityEventProducer;

/// Pending events of one unit of work.
///
/// Obtained from [`EntityEventProducer::begin`]. Dropping the scope without
/// calling [`TransactionScope::commit`] behaves like a rollback.
#[must_use = "events are discarded unless the scope is committed"]
pub struct TransactionScope {
    producer: EntityEventProducer,
    pending: Vec<EntityEvent>,
    finished: bool,
}

impl TransactionScope {
    pub(crate) fn new(producer: EntityEventProducer) -> Self {
        Self {
            producer,
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Record an event to publish on commit.
    pub fn notify(&mut self, event: EntityEvent) {
        debug!(event = %event, "Entity event deferred until commit");
        self.pending.push(event);
    }

    /// Events recorded so far, in notification order.
    #[must_use]
    pub fn pending(&self) -> &[EntityEvent] {
        &self.pending
    }

    /// Publish every recorded event, in notification order.
    ///
    /// Returns the number of events handed to the producer.
    pub fn commit(mut self) -> usize {
        self.finished = true;
        let events = std::mem::take(&mut self.pending);
        let count = events.len();
        for event in events {
            self.producer.publish(event);
        }
        debug!(count = count, "Transaction committed");
        count
    }

    /// Discard every recorded event.
    pub fn rollback(mut self) {
        self.discard("rollback");
    }

    fn discard(&mut self, reason: &'static str) {
        self.finished = true;
        let events = std::mem::take(&mut self.pending);
        if events.is_empty() {
            return;
        }
        debug!(count = events.len(), reason = reason, "Deferred entity events discarded");
        EVENTS_DROPPED
            .with_label_values(&[self.producer.destination(), reason])
            .inc_by(events.len() as f64);
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.finished {
            self.discard("rollback");
        }
    }
}
