//! # Job Events
//!
//! Status changes and progression of long-running jobs (imports, exports,
//! data synchronisation) travel on their own destination so that UIs can
//! follow a job started on another instance.
//!
//! Listeners register under `job#<id>` for one job, or under `job` for
//! every job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sumaris_telemetry::{metric_inc, EVENTS_CONSUMED, EVENTS_DROPPED};
use sumaris_types::{BrokerMessage, EventError, JobEvent, JobEventKind, JobProgression, JobStatus};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broker::MessageBroker;
use crate::codec::{decode_job_event, encode_job_event};
use crate::config::EventsConfig;
use crate::consumer::DispatchOutcome;
use crate::listener::invoke_isolated;
use crate::producer::PublishWorker;
use crate::registry::{ListenerRegistry, INSTANCE_KEY_SEPARATOR};
use crate::selector::MessageSelector;
use crate::subscription::BrokerSubscription;

/// Key matching events of every job.
pub const ALL_JOBS_KEY: &str = "job";

/// Key matching events of one job.
#[must_use]
pub fn job_key(job_id: i64) -> String {
    format!("{ALL_JOBS_KEY}{INSTANCE_KEY_SEPARATOR}{job_id}")
}

/// Receives job events.
pub trait JobEventListener: Send + Sync {
    fn on_status(&self, job_id: i64, status: JobStatus) -> anyhow::Result<()> {
        let _ = (job_id, status);
        Ok(())
    }

    fn on_progression(&self, job_id: i64, progression: &JobProgression) -> anyhow::Result<()> {
        let _ = (job_id, progression);
        Ok(())
    }
}

/// Publishes job events on the job destination, in submission order.
#[derive(Clone)]
pub struct JobEventProducer {
    worker: Arc<PublishWorker>,
    events_published: Arc<AtomicU64>,
}

impl JobEventProducer {
    #[must_use]
    pub fn new(config: &EventsConfig, broker: Option<Arc<dyn MessageBroker>>) -> Self {
        Self {
            worker: Arc::new(PublishWorker::start(&config.job_destination, config.enabled, broker)),
            events_published: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.worker.is_active()
    }

    /// Publish a job event, fire-and-forget.
    pub fn publish(&self, event: JobEvent) {
        if !self.is_enabled() {
            debug!(event = %event, "Job event publication disabled");
            return;
        }
        let message = match encode_job_event(&event, self.worker.destination()) {
            Ok(message) => message,
            Err(e) => {
                error!(event = %event, error = %e, "Failed to encode job event");
                metric_inc!(EVENTS_DROPPED, &[self.worker.destination(), "encode_error"]);
                return;
            }
        };
        if self.worker.enqueue(message) {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn publish_status(&self, job_id: i64, status: JobStatus) {
        self.publish(JobEvent::status(job_id, status));
    }

    pub fn publish_progression(&self, job_id: i64, progression: JobProgression) {
        self.publish(JobEvent::progression(job_id, progression));
    }

    /// Wait until every event published so far was handed to the broker.
    pub async fn flush(&self) {
        self.worker.flush().await;
    }

    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

/// Consumer of the job destination.
pub struct JobEventConsumer {
    destination: String,
    registry: ListenerRegistry<dyn JobEventListener>,
    subscription: Option<BrokerSubscription>,
}

impl JobEventConsumer {
    /// Subscribe to every message on `config.job_destination`.
    #[must_use]
    pub fn new(
        config: &EventsConfig,
        broker: &dyn MessageBroker,
        registry: ListenerRegistry<dyn JobEventListener>,
    ) -> Self {
        Self {
            destination: config.job_destination.clone(),
            registry,
            subscription: Some(broker.subscribe(&config.job_destination, MessageSelector::all())),
        }
    }

    /// Notify the listeners of the job and the listeners of every job.
    pub fn dispatch(&self, event: &JobEvent) -> DispatchOutcome {
        let keys = [job_key(event.job_id), ALL_JOBS_KEY.to_string()];
        let listeners = self.registry.lookup(&keys);

        let mut outcome = DispatchOutcome {
            invoked: listeners.len(),
            failed: 0,
        };
        for listener in &listeners {
            let ok = invoke_isolated(ALL_JOBS_KEY, event, || match &event.kind {
                JobEventKind::Status(status) => listener.on_status(event.job_id, *status),
                JobEventKind::Progression(progression) => {
                    listener.on_progression(event.job_id, progression)
                }
            });
            if !ok {
                outcome.failed += 1;
            }
        }

        debug!(event = %event, invoked = outcome.invoked, "Job event dispatched");
        outcome
    }

    /// Decode a broker message and dispatch the resulting job event.
    ///
    /// # Errors
    ///
    /// Returns the decoding error for malformed messages.
    pub fn handle_message(&self, message: &BrokerMessage) -> Result<DispatchOutcome, EventError> {
        let event = decode_job_event(message)?;
        metric_inc!(EVENTS_CONSUMED, &[&self.destination, event.kind.type_name()]);
        Ok(self.dispatch(&event))
    }

    /// Consume messages until `shutdown` turns true or the subscription closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut subscription) = self.subscription.take() else {
            return;
        };
        info!(destination = %self.destination, "Job event consumer started");

        while !*shutdown.borrow() {
            tokio::select! {
                next = subscription.recv() => {
                    let Some(message) = next else {
                        break;
                    };
                    if let Err(e) = self.handle_message(&message) {
                        error!(
                            destination = %self.destination,
                            message_id = %message.message_id,
                            error = %e,
                            "Malformed job message dropped"
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

        info!(destination = %self.destination, "Job event consumer stopped");
    }
}
