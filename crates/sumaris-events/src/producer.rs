//! # Entity Event Producer
//!
//! Publishes entity events to the broker without blocking the caller.
//!
//! Each producer owns a queue drained by a single worker task, so the
//! messages it emits reach the broker in submission order. Broker failures
//! are logged and counted; they never surface to the code that triggered
//! the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sumaris_telemetry::{metric_inc, EVENTS_DROPPED, EVENTS_PUBLISHED};
use sumaris_types::{BrokerMessage, EntityEvent};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::broker::MessageBroker;
use crate::codec::encode_entity_event;
use crate::config::EventsConfig;
use crate::transaction::TransactionScope;

enum Command {
    Publish(BrokerMessage),
    Flush(oneshot::Sender<()>),
}

/// Queue plus worker task shared by the entity and job producers.
pub(crate) struct PublishWorker {
    destination: String,
    sender: Option<mpsc::UnboundedSender<Command>>,
}

impl PublishWorker {
    /// Spawn the worker on the current Tokio runtime.
    ///
    /// Without a broker, when disabled, or outside a runtime, the worker is
    /// inactive and every message is discarded.
    pub(crate) fn start(
        destination: &str,
        enabled: bool,
        broker: Option<Arc<dyn MessageBroker>>,
    ) -> Self {
        let sender = match (enabled, broker) {
            (true, Some(broker)) => match Handle::try_current() {
                Ok(handle) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    handle.spawn(run_worker(destination.to_string(), broker, rx));
                    Some(tx)
                }
                Err(_) => {
                    warn!(
                        destination = %destination,
                        "No Tokio runtime, event publication disabled"
                    );
                    None
                }
            },
            _ => None,
        };

        Self {
            destination: destination.to_string(),
            sender,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    pub(crate) fn destination(&self) -> &str {
        &self.destination
    }

    /// Queue a message. Returns false when the message was discarded.
    ///
    /// Producers check [`PublishWorker::is_active`] first, so an inactive
    /// worker is not a drop.
    pub(crate) fn enqueue(&self, message: BrokerMessage) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        if sender.send(Command::Publish(message)).is_err() {
            warn!(destination = %self.destination, "Publish worker stopped, message discarded");
            metric_inc!(EVENTS_DROPPED, &[&self.destination, "worker_stopped"]);
            return false;
        }
        true
    }

    /// Wait until every message queued before this call was handed to the broker.
    pub(crate) async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if sender.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    destination: String,
    broker: Arc<dyn MessageBroker>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    debug!(destination = %destination, "Publish worker started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Publish(message) => {
                let message_id = message.message_id;
                match broker.send(message).await {
                    Ok(receivers) => {
                        debug!(
                            destination = %destination,
                            message_id = %message_id,
                            receivers = receivers,
                            "Event published"
                        );
                        metric_inc!(EVENTS_PUBLISHED, &[&destination]);
                    }
                    Err(e) => {
                        warn!(
                            destination = %destination,
                            message_id = %message_id,
                            error = %e,
                            "Event dropped (broker error)"
                        );
                        metric_inc!(EVENTS_DROPPED, &[&destination, "broker_error"]);
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(destination = %destination, "Publish worker stopped");
}

struct ProducerInner {
    worker: PublishWorker,
    events_published: AtomicU64,
}

/// Publishes entity events on the entity destination.
///
/// Cloning is cheap; clones share the same queue and ordering.
#[derive(Clone)]
pub struct EntityEventProducer {
    inner: Arc<ProducerInner>,
}

impl EntityEventProducer {
    /// Create a producer for `config.entity_destination`.
    ///
    /// Publication is a silent no-op when `config.enabled` is false, when no
    /// broker is given, or when called outside a Tokio runtime.
    #[must_use]
    pub fn new(config: &EventsConfig, broker: Option<Arc<dyn MessageBroker>>) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                worker: PublishWorker::start(&config.entity_destination, config.enabled, broker),
                events_published: AtomicU64::new(0),
            }),
        }
    }

    /// A producer that never publishes.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&EventsConfig::disabled(), None)
    }

    /// Returns true when events actually reach a broker.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.worker.is_active()
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        self.inner.worker.destination()
    }

    /// Publish an event, fire-and-forget.
    ///
    /// Prefer [`EntityEventProducer::begin`] from transactional code so the
    /// event is only sent once the transaction commits.
    pub fn publish(&self, event: EntityEvent) {
        if !self.is_enabled() {
            debug!(event = %event, "Entity event publication disabled");
            return;
        }
        let message = match encode_entity_event(&event, self.destination()) {
            Ok(message) => message,
            Err(e) => {
                error!(event = %event, error = %e, "Failed to encode entity event");
                metric_inc!(EVENTS_DROPPED, &[self.destination(), "encode_error"]);
                return;
            }
        };
        if self.inner.worker.enqueue(message) {
            self.inner.events_published.fetch_add(1, Ordering::Relaxed);
            debug!(event = %event, "Entity event queued");
        }
    }

    /// Wait until every event published so far was handed to the broker.
    pub async fn flush(&self) {
        self.inner.worker.flush().await;
    }

    /// Open a transaction scope whose events are published on commit only.
    #[must_use]
    pub fn begin(&self) -> TransactionScope {
        TransactionScope::new(self.clone())
    }

    /// Get the total number of events queued for publication.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.inner.events_published.load(Ordering::Relaxed)
    }
}
