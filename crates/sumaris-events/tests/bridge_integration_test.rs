//! # Bridge Integration Tests
//!
//! End-to-end flows through the public API: a service publishes through the
//! in-memory broker and a second service, standing in for another
//! application instance, receives the events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sumaris_events::{
    BrokerMessage, EntityEvent, EntityEventListener, EntityEventService, EventsConfig, FnListener,
    InMemoryBroker, JobEventListener, JobProgression, JobStatus, MessageBroker, MessageProperties,
};
use tokio::sync::watch;
use tokio::time::timeout;

fn recorder() -> (Arc<Mutex<Vec<EntityEvent>>>, Arc<dyn EntityEventListener>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = FnListener::new(move |event: &EntityEvent| {
        sink.lock().push(event.clone());
        Ok(())
    });
    (seen, Arc::new(listener))
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

/// Two instances share a broker: the writer commits, the reader is notified.
#[tokio::test]
async fn test_committed_event_reaches_other_instance() {
    // Arrange
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let writer = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();
    let reader = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();

    let (seen, listener) = recorder();
    let _registration = reader.watch_entity("Vessel", 12, listener);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = reader.spawn_consumer(shutdown_rx);

    // Act
    let mut tx = writer.begin();
    tx.notify(
        EntityEvent::update("Vessel", 12)
            .unwrap()
            .with_data(serde_json::json!({"id": 12, "name": "Marie-Galante"})),
    );
    tx.notify(EntityEvent::update("Vessel", 13).unwrap());
    assert_eq!(tx.commit(), 2);

    // Assert
    wait_for(|| !seen.lock().is_empty()).await;
    writer.producer().flush().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1, "only the watched instance is delivered");
    assert_eq!(seen[0].id().to_string(), "12");
    assert_eq!(seen[0].data().unwrap()["name"], "Marie-Galante");

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// A rolled back transaction never reaches the broker.
#[tokio::test]
async fn test_rollback_reaches_nobody() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();

    let (seen, listener) = recorder();
    let _registration = service.watch_entities(["Trip"], listener);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _handles = service.spawn_consumer(shutdown_rx);

    let mut tx = service.begin();
    tx.notify(EntityEvent::delete("Trip", 1).unwrap());
    tx.rollback();
    service.producer().flush().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(seen.lock().is_empty());
    assert_eq!(broker.messages_sent(), 0);
}

/// A malformed message is skipped; the consumer keeps serving later events.
#[tokio::test]
async fn test_consumer_survives_malformed_message() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();

    let (seen, listener) = recorder();
    let _registration = service.watch_entities(["Trip"], listener);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _handles = service.spawn_consumer(shutdown_rx);

    let mut garbage = sumaris_events::codec::encode_entity_event(
        &EntityEvent::update("Trip", 1).unwrap(),
        "entity-event",
    )
    .unwrap();
    garbage.body = b"{broken".to_vec();
    broker.send(garbage).await.unwrap();

    service.publish(EntityEvent::update("Trip", 2).unwrap());

    wait_for(|| !seen.lock().is_empty()).await;
    assert_eq!(seen.lock()[0].id().to_string(), "2");
}

/// Disabled configuration: publishing is silent and nothing is consumed.
#[tokio::test]
async fn test_disabled_bridge_is_silent() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = EntityEventService::new(EventsConfig::disabled(), Some(broker.clone())).unwrap();

    let mut tx = service.begin();
    tx.notify(EntityEvent::insert("Trip", 1).unwrap());
    assert_eq!(tx.commit(), 1);
    service.producer().flush().await;

    assert_eq!(broker.messages_sent(), 0);
    let (_tx, rx) = watch::channel(false);
    assert!(service.spawn_consumer(rx).is_empty());
}

#[derive(Default)]
struct JobRecorder {
    statuses: Mutex<Vec<JobStatus>>,
    percents: Mutex<Vec<Option<u8>>>,
}

impl JobEventListener for JobRecorder {
    fn on_status(&self, _job_id: i64, status: JobStatus) -> anyhow::Result<()> {
        self.statuses.lock().push(status);
        Ok(())
    }

    fn on_progression(&self, _job_id: i64, progression: &JobProgression) -> anyhow::Result<()> {
        self.percents.lock().push(progression.percent());
        Ok(())
    }
}

/// Job progression followed from another instance.
#[tokio::test]
async fn test_job_progression_flow() {
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let worker = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();
    let ui = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();

    let recorder = Arc::new(JobRecorder::default());
    let _registration = ui.watch_job(3, recorder.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = ui.spawn_consumer(shutdown_rx);

    let jobs = worker.job_producer();
    jobs.publish_status(3, JobStatus::Running);
    jobs.publish_progression(3, JobProgression::new("Importing vessels", 50, 100));
    jobs.publish_status(4, JobStatus::Running);
    jobs.publish_status(3, JobStatus::Success);
    jobs.flush().await;

    wait_for(|| recorder.statuses.lock().len() == 2).await;
    assert_eq!(
        recorder.statuses.lock().as_slice(),
        &[JobStatus::Running, JobStatus::Success]
    );
    assert_eq!(recorder.percents.lock().as_slice(), &[Some(50)]);

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Messages from a foreign producer follow the same property contract.
#[tokio::test]
async fn test_foreign_message_without_payload() {
    let broker = Arc::new(InMemoryBroker::new());
    let service = EntityEventService::new(EventsConfig::default(), Some(broker.clone())).unwrap();

    let (seen, listener) = recorder();
    let _registration = service.watch_entities(["Landing"], listener);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _handles = service.spawn_consumer(shutdown_rx);

    let mut properties = MessageProperties::new();
    properties.set_text("operation", "delete");
    properties.set_text("entityName", "Landing");
    properties.set_text("id", "77");
    broker
        .send(BrokerMessage::new("entity-event", properties, b"77".to_vec()))
        .await
        .unwrap();

    wait_for(|| !seen.lock().is_empty()).await;
    let event = seen.lock()[0].clone();
    assert_eq!(event.to_string(), "delete Landing#77");
    assert!(event.data().is_none());
}
