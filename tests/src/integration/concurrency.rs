//! # Concurrency Scenarios
//!
//! Publishers on many tasks, listeners registered and disposed while the
//! consumer dispatches.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use sumaris_events::{EntityEvent, EventsConfig, InMemoryBroker, MessageBroker};

    use crate::fixtures::{settle, wait_until, Instance, RecordingListener};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_producer_keeps_its_order() {
        let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
        let reader = Instance::start(broker.clone(), EventsConfig::default());
        let recorder = RecordingListener::new();
        let _watch = reader.service.watch_entities(["Writer0", "Writer1", "Writer2"], recorder.clone());

        let writers: Vec<Instance> = (0..3)
            .map(|_| Instance::start(broker.clone(), EventsConfig::default()))
            .collect();

        let mut tasks = Vec::new();
        for (n, writer) in writers.iter().enumerate() {
            let producer = writer.service.producer().clone();
            tasks.push(tokio::spawn(async move {
                for id in 0..100_i64 {
                    producer.publish(EntityEvent::update(format!("Writer{n}"), id).unwrap());
                }
                producer.flush().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        wait_until("300 events", || recorder.len() == 300).await;

        let mut per_writer: HashMap<String, Vec<String>> = HashMap::new();
        for event in recorder.events() {
            per_writer
                .entry(event.entity_name().to_string())
                .or_default()
                .push(event.id().to_string());
        }
        let expected: Vec<String> = (0..100).map(|id: i64| id.to_string()).collect();
        for ids in per_writer.values() {
            assert_eq!(ids, &expected);
        }

        for writer in writers {
            writer.stop().await;
        }
        reader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_churn_during_dispatch() {
        let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
        let instance = Instance::start(broker, EventsConfig::default());

        let stable = RecordingListener::new();
        let _stable = instance.service.watch_entities(["Trip"], stable.clone());
        let registry = instance.service.registry().clone();

        let churn = tokio::spawn(async move {
            for _ in 0..200 {
                let listener = RecordingListener::new();
                let registration = registry.register(["Trip", "Trip#1"], listener);
                tokio::task::yield_now().await;
                registration.dispose();
            }
        });

        for _ in 0..50 {
            instance.service.publish(EntityEvent::update("Trip", 1).unwrap());
        }
        churn.await.unwrap();

        wait_until("stable listener", || stable.len() == 50).await;
        settle().await;

        assert_eq!(instance.service.registry().len(), 1);
        instance.stop().await;
    }
}
