//! Shared test fixtures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sumaris_events::{
    BrokerError, BrokerMessage, BrokerSubscription, EntityEvent, EntityEventListener,
    EntityEventService, EventsConfig, InMemoryBroker, MessageBroker, MessageSelector,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

// =============================================================================
// LISTENERS
// =============================================================================

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EntityEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EntityEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn record(&self, event: &EntityEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

impl EntityEventListener for RecordingListener {
    fn on_insert(&self, event: &EntityEvent) -> anyhow::Result<()> {
        self.record(event)
    }

    fn on_update(&self, event: &EntityEvent) -> anyhow::Result<()> {
        self.record(event)
    }

    fn on_delete(&self, event: &EntityEvent) -> anyhow::Result<()> {
        self.record(event)
    }
}

/// Fails on every update, either with an error or a panic.
pub struct FailingListener {
    pub panics: bool,
}

impl EntityEventListener for FailingListener {
    fn on_update(&self, event: &EntityEvent) -> anyhow::Result<()> {
        if self.panics {
            panic!("listener crashed on {event}");
        }
        anyhow::bail!("cannot refresh cache for {event}")
    }
}

// =============================================================================
// BROKERS
// =============================================================================

/// In-memory broker rejecting every `fail_every`-th send.
pub struct FlakyBroker {
    inner: InMemoryBroker,
    fail_every: u64,
    attempts: AtomicU64,
}

impl FlakyBroker {
    pub fn new(fail_every: u64) -> Self {
        Self {
            inner: InMemoryBroker::new(),
            fail_every: fail_every.max(1),
            attempts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn send(&self, message: BrokerMessage) -> Result<usize, BrokerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt % self.fail_every == 0 {
            return Err(BrokerError::SendFailed(format!("attempt {attempt} rejected")));
        }
        self.inner.send(message).await
    }

    fn subscribe(&self, destination: &str, selector: MessageSelector) -> BrokerSubscription {
        self.inner.subscribe(destination, selector)
    }

    fn messages_sent(&self) -> u64 {
        self.inner.messages_sent()
    }
}

// =============================================================================
// INSTANCES
// =============================================================================

/// One application instance attached to a shared broker, consumers running.
pub struct Instance {
    pub service: EntityEventService,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Instance {
    pub fn start(broker: Arc<dyn MessageBroker>, config: EventsConfig) -> Self {
        let service = EntityEventService::new(config, Some(broker)).expect("valid config");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = service.spawn_consumer(shutdown_rx);
        Self {
            service,
            shutdown_tx,
            handles,
        }
    }

    pub async fn stop(self) {
        self.service.producer().flush().await;
        self.service.job_producer().flush().await;
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            handle.await.expect("consumer task panicked");
        }
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

/// Give in-flight messages a chance to be delivered.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
