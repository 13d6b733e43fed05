//! # SUMARiS Node
//!
//! Runs the entity-event bridge on an in-memory broker and logs every event
//! about the watched entities.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize telemetry (logging, metrics)
//! 3. Create the broker and the event service
//! 4. Register the logging listener for `SUMARIS_WATCH_ENTITIES`
//! 5. Start the consumers
//! 6. Wait for Ctrl+C, then signal shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sumaris_events::{
    EntityEvent, EntityEventListener, EntityEventService, EventsConfig, InMemoryBroker,
    ListenerRegistration, MessageBroker,
};
use sumaris_telemetry::{log_entity_event, TelemetryConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub events: EventsConfig,
    pub telemetry: TelemetryConfig,
    /// Entity names logged by the node.
    pub watch_entities: Vec<String>,
}

/// Load configuration from the environment.
///
/// # Errors
///
/// Fails when an events variable holds an invalid value.
pub fn load_config() -> Result<NodeConfig> {
    let events = EventsConfig::from_env().context("Invalid events configuration")?;
    let watch_entities = std::env::var("SUMARIS_WATCH_ENTITIES")
        .map(|v| parse_entity_names(&v))
        .unwrap_or_default();

    Ok(NodeConfig {
        events,
        telemetry: TelemetryConfig::from_env(),
        watch_entities,
    })
}

fn parse_entity_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Logs every event it receives.
struct LoggingListener;

impl EntityEventListener for LoggingListener {
    fn on_insert(&self, event: &EntityEvent) -> anyhow::Result<()> {
        log_entity_event!(info, "Entity inserted", event);
        Ok(())
    }

    fn on_update(&self, event: &EntityEvent) -> anyhow::Result<()> {
        log_entity_event!(info, "Entity updated", event, has_data = event.data().is_some());
        Ok(())
    }

    fn on_delete(&self, event: &EntityEvent) -> anyhow::Result<()> {
        log_entity_event!(info, "Entity deleted", event);
        Ok(())
    }
}

/// The running bridge.
pub struct NodeRuntime {
    service: EntityEventService,
    broker: Arc<InMemoryBroker>,
    registration: Option<ListenerRegistration>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NodeRuntime {
    /// Create the broker and the event service.
    ///
    /// # Errors
    ///
    /// Fails when the events configuration is invalid.
    pub fn new(config: NodeConfig) -> Result<Self> {
        info!("Creating SUMARiS node runtime");

        let broker = Arc::new(InMemoryBroker::with_capacity(config.events.channel_capacity));
        let shared: Arc<dyn MessageBroker> = broker.clone();
        let service = EntityEventService::new(config.events, Some(shared))
            .context("Failed to create entity event service")?;

        let registration = if config.watch_entities.is_empty() {
            None
        } else {
            info!(entities = ?config.watch_entities, "Watching entities");
            Some(service.watch_entities(&config.watch_entities, Arc::new(LoggingListener)))
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            service,
            broker,
            registration,
            handles: Vec::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Start the consumers.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            warn!("Node runtime already started");
            return;
        }
        self.handles = self.service.spawn_consumer(self.shutdown_rx.clone());
        info!(consumers = self.handles.len(), "Node runtime started");
    }

    #[must_use]
    pub fn service(&self) -> &EntityEventService {
        &self.service
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    /// Shutdown the node gracefully.
    ///
    /// 1. Flush pending publications
    /// 2. Signal the consumers
    /// 3. Wait for them (with timeout)
    pub async fn shutdown(mut self) {
        info!("Initiating graceful shutdown...");

        self.service.producer().flush().await;
        self.service.job_producer().flush().await;

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        for handle in self.handles.drain(..) {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Consumer task failed: {}", e),
                Err(_) => warn!("Consumer did not stop within timeout"),
            }
        }

        if let Some(registration) = self.registration.take() {
            registration.dispose();
        }
        self.broker.close();

        info!("Shutdown complete");
    }
}
