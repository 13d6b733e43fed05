//! # Entity Event Service
//!
//! Single entry point wiring configuration, producers, listener registries
//! and consumers together.

use std::sync::Arc;

use sumaris_types::{EntityEvent, EntityId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::MessageBroker;
use crate::config::{ConfigError, EventsConfig};
use crate::consumer::EntityEventConsumer;
use crate::jobs::{job_key, JobEventConsumer, JobEventListener, JobEventProducer, ALL_JOBS_KEY};
use crate::listener::EntityEventListener;
use crate::producer::EntityEventProducer;
use crate::registry::{entity_key, ListenerRegistration, ListenerRegistry};
use crate::transaction::TransactionScope;

/// Facade over the entity-event and job-event bridge.
pub struct EntityEventService {
    config: EventsConfig,
    broker: Option<Arc<dyn MessageBroker>>,
    producer: EntityEventProducer,
    job_producer: JobEventProducer,
    registry: ListenerRegistry<dyn EntityEventListener>,
    job_registry: ListenerRegistry<dyn JobEventListener>,
}

impl EntityEventService {
    /// Build the service. Producers start their workers immediately when
    /// called from a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an invalid configuration.
    pub fn new(
        config: EventsConfig,
        broker: Option<Arc<dyn MessageBroker>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.enabled && broker.is_none() {
            warn!("No message broker configured, entity events stay local");
        }

        Ok(Self {
            producer: EntityEventProducer::new(&config, broker.clone()),
            job_producer: JobEventProducer::new(&config, broker.clone()),
            registry: ListenerRegistry::new(),
            job_registry: ListenerRegistry::new(),
            config,
            broker,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EventsConfig {
        &self.config
    }

    /// Listen to every event about any of `entity_names`.
    ///
    /// Names that cannot appear on an event (blank, or containing the
    /// instance key separator) are skipped with a warning.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn watch_entities<I, S>(
        &self,
        entity_names: I,
        listener: Arc<dyn EntityEventListener>,
    ) -> ListenerRegistration
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = entity_names
            .into_iter()
            .filter(|name| routable(name.as_ref()))
            .map(|name| entity_key(name.as_ref()))
            .collect();
        self.registry.register(keys, listener)
    }

    /// Listen to events about one entity instance.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn watch_entity(
        &self,
        entity_name: &str,
        id: impl Into<EntityId>,
        listener: Arc<dyn EntityEventListener>,
    ) -> ListenerRegistration {
        if !routable(entity_name) {
            return self.registry.register(Vec::<String>::new(), listener);
        }
        self.registry.register_instance(entity_name, &id.into(), listener)
    }

    /// Listen to the events of one job.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn watch_job(&self, job_id: i64, listener: Arc<dyn JobEventListener>) -> ListenerRegistration {
        self.job_registry.register([job_key(job_id)], listener)
    }

    /// Listen to the events of every job.
    #[must_use = "dropping the registration unregisters the listener"]
    pub fn watch_all_jobs(&self, listener: Arc<dyn JobEventListener>) -> ListenerRegistration {
        self.job_registry.register([ALL_JOBS_KEY], listener)
    }

    /// Open a transaction scope on the entity producer.
    pub fn begin(&self) -> TransactionScope {
        self.producer.begin()
    }

    /// Publish an event outside of any transaction.
    pub fn publish(&self, event: EntityEvent) {
        self.producer.publish(event);
    }

    #[must_use]
    pub fn producer(&self) -> &EntityEventProducer {
        &self.producer
    }

    #[must_use]
    pub fn job_producer(&self) -> &JobEventProducer {
        &self.job_producer
    }

    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry<dyn EntityEventListener> {
        &self.registry
    }

    #[must_use]
    pub fn job_registry(&self) -> &ListenerRegistry<dyn JobEventListener> {
        &self.job_registry
    }

    /// Start the entity and job consumers.
    ///
    /// Subscriptions exist when this returns, so events published afterwards
    /// are not missed. Returns no handle when the bridge is disabled or has
    /// no broker.
    pub fn spawn_consumer(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Some(broker) = self.broker.as_deref().filter(|_| self.config.enabled) else {
            info!("Entity event consumer not started (bridge disabled or no broker)");
            return Vec::new();
        };

        let entity_consumer = EntityEventConsumer::new(&self.config, broker, self.registry.clone());
        let job_consumer = JobEventConsumer::new(&self.config, broker, self.job_registry.clone());

        vec![
            tokio::spawn(entity_consumer.run(shutdown.clone())),
            tokio::spawn(job_consumer.run(shutdown)),
        ]
    }
}

fn routable(entity_name: &str) -> bool {
    match EntityEvent::validate_name(entity_name) {
        Ok(()) => true,
        Err(e) => {
            warn!(entity = %entity_name, error = %e, "Listener not registered for entity");
            false
        }
    }
}
