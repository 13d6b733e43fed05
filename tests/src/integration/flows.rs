//! # Integration Test Flows
//!
//! Several instances share one broker, the way pods of one deployment share
//! a message broker:
//!
//! 1. **Commit gating**: only committed events leave the writer
//! 2. **Routing**: instance keys and entity keys, de-duplicated
//! 3. **Isolation**: failing listeners never starve their siblings
//! 4. **Configuration**: consumed operations follow the config
//! 5. **Job events**: status and progression followed remotely

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use sumaris_events::{
        EntityEvent, EntityEventListener, EntityId, EntityOperation, EventsConfig, InMemoryBroker,
        JobEventListener, JobProgression, JobStatus, MessageBroker,
    };
    use sumaris_telemetry::LISTENER_FAILURES;

    use crate::fixtures::{settle, wait_until, FailingListener, FlakyBroker, Instance, RecordingListener};

    fn shared_broker() -> Arc<dyn MessageBroker> {
        Arc::new(InMemoryBroker::new())
    }

    // =========================================================================
    // COMMIT GATING
    // =========================================================================

    #[tokio::test]
    async fn test_only_committed_work_is_observed() {
        let broker = shared_broker();
        let writer = Instance::start(broker.clone(), EventsConfig::default());
        let reader = Instance::start(broker.clone(), EventsConfig::default());

        let recorder = RecordingListener::new();
        let _watch = reader.service.watch_entities(["Trip"], recorder.clone());

        // Failed unit of work
        let mut failed = writer.service.begin();
        failed.notify(EntityEvent::update("Trip", 1).unwrap());
        failed.notify(EntityEvent::delete("Trip", 2).unwrap());
        drop(failed);

        // Successful unit of work
        let mut ok = writer.service.begin();
        ok.notify(EntityEvent::update("Trip", 3).unwrap());
        ok.commit();

        wait_until("committed trip update", || !recorder.is_empty()).await;
        settle().await;

        let ids: Vec<String> = recorder.events().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["3"]);

        writer.stop().await;
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_writer_sees_its_own_events() {
        let broker = shared_broker();
        let instance = Instance::start(broker, EventsConfig::default());

        let recorder = RecordingListener::new();
        let _watch = instance.service.watch_entity("Vessel", 8, recorder.clone());

        instance.service.publish(EntityEvent::delete("Vessel", 8).unwrap());

        wait_until("own delete", || recorder.len() == 1).await;
        assert_eq!(recorder.events()[0].operation(), EntityOperation::Delete);

        instance.stop().await;
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    #[tokio::test]
    async fn test_instance_and_entity_listeners() {
        let broker = shared_broker();
        let writer = Instance::start(broker.clone(), EventsConfig::default());
        let reader = Instance::start(broker.clone(), EventsConfig::default());

        let vessel_12 = RecordingListener::new();
        let all_vessels = RecordingListener::new();
        let both = RecordingListener::new();
        let _r1 = reader.service.watch_entity("Vessel", 12, vessel_12.clone());
        let _r2 = reader.service.watch_entities(["Vessel"], all_vessels.clone());
        let _r3 = reader.service.watch_entity("Vessel", 12, both.clone());
        let _r4 = reader.service.watch_entities(["Vessel"], both.clone());

        writer.service.publish(
            EntityEvent::update("Vessel", 12)
                .unwrap()
                .with_data(json!({"id": 12, "exteriorMarking": "FRA-12"})),
        );
        writer.service.publish(EntityEvent::update("Vessel", 13).unwrap());
        writer.service.publish(EntityEvent::update("Trip", 12).unwrap());

        wait_until("vessel updates", || all_vessels.len() == 2).await;
        settle().await;

        assert_eq!(vessel_12.len(), 1);
        assert_eq!(
            vessel_12.events()[0].data().unwrap()["exteriorMarking"],
            "FRA-12"
        );
        // Registered under both keys, notified once per event
        assert_eq!(both.len(), 2);

        writer.stop().await;
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_disposed_listener_stops_receiving() {
        let broker = shared_broker();
        let instance = Instance::start(broker, EventsConfig::default());

        let kept = RecordingListener::new();
        let disposed = RecordingListener::new();
        let _kept = instance.service.watch_entities(["Landing"], kept.clone());
        let registration = instance.service.watch_entities(["Landing"], disposed.clone());

        instance.service.publish(EntityEvent::update("Landing", 1).unwrap());
        wait_until("first landing", || disposed.len() == 1).await;

        registration.dispose();
        instance.service.publish(EntityEvent::update("Landing", 2).unwrap());
        wait_until("second landing", || kept.len() == 2).await;

        assert_eq!(disposed.len(), 1);
        instance.stop().await;
    }

    #[tokio::test]
    async fn test_text_identifiers() {
        let broker = shared_broker();
        let instance = Instance::start(broker, EventsConfig::default());

        let recorder = RecordingListener::new();
        let _watch = instance.service.watch_entity("Status", "ENABLE", recorder.clone());

        instance.service.publish(EntityEvent::update("Status", "ENABLE").unwrap());
        instance.service.publish(EntityEvent::update("Status", "DISABLE").unwrap());

        wait_until("status update", || recorder.len() == 1).await;
        settle().await;
        assert_eq!(recorder.events()[0].id(), &EntityId::Text("ENABLE".into()));

        instance.stop().await;
    }

    // =========================================================================
    // ISOLATION
    // =========================================================================

    #[tokio::test]
    async fn test_failing_listeners_do_not_starve_others() {
        let broker = shared_broker();
        let instance = Instance::start(broker, EventsConfig::default());

        let erroring: Arc<dyn EntityEventListener> = Arc::new(FailingListener { panics: false });
        let panicking: Arc<dyn EntityEventListener> = Arc::new(FailingListener { panics: true });
        let healthy = RecordingListener::new();
        let _r1 = instance.service.watch_entities(["Gear"], erroring);
        let _r2 = instance.service.watch_entities(["Gear"], panicking);
        let _r3 = instance.service.watch_entities(["Gear"], healthy.clone());

        let failures = LISTENER_FAILURES.with_label_values(&["Gear"]);
        let before = failures.get();

        instance.service.publish(EntityEvent::update("Gear", 1).unwrap());
        instance.service.publish(EntityEvent::update("Gear", 2).unwrap());

        wait_until("healthy listener", || healthy.len() == 2).await;
        assert!(failures.get() >= before + 4.0);

        instance.stop().await;
    }

    #[tokio::test]
    async fn test_broker_failures_stay_with_the_producer() {
        let broker: Arc<dyn MessageBroker> = Arc::new(FlakyBroker::new(2));
        let instance = Instance::start(broker.clone(), EventsConfig::default());

        let recorder = RecordingListener::new();
        let _watch = instance.service.watch_entities(["Trip"], recorder.clone());

        for id in 1..=6_i64 {
            instance.service.publish(EntityEvent::update("Trip", id).unwrap());
        }
        instance.service.producer().flush().await;

        wait_until("accepted trips", || recorder.len() == 3).await;
        settle().await;

        // Every second send is rejected; the rest keeps its order
        let ids: Vec<String> = recorder.events().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["1", "3", "5"]);
        assert_eq!(instance.service.producer().events_published(), 6);

        instance.stop().await;
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    #[tokio::test]
    async fn test_inserts_consumed_only_when_configured() {
        let broker = shared_broker();
        let writer = Instance::start(broker.clone(), EventsConfig::default());
        let default_reader = Instance::start(broker.clone(), EventsConfig::default());
        let insert_reader = Instance::start(
            broker.clone(),
            EventsConfig {
                consumer_operations: vec![EntityOperation::Insert],
                ..EventsConfig::default()
            },
        );

        let default_seen = RecordingListener::new();
        let insert_seen = RecordingListener::new();
        let _r1 = default_reader.service.watch_entities(["Sale"], default_seen.clone());
        let _r2 = insert_reader.service.watch_entities(["Sale"], insert_seen.clone());

        writer.service.publish(EntityEvent::insert("Sale", 1).unwrap());
        writer.service.publish(EntityEvent::update("Sale", 1).unwrap());

        wait_until("default reader update", || default_seen.len() == 1).await;
        wait_until("insert reader insert", || insert_seen.len() == 1).await;
        settle().await;

        assert_eq!(default_seen.events()[0].operation(), EntityOperation::Update);
        assert_eq!(insert_seen.events()[0].operation(), EntityOperation::Insert);

        writer.stop().await;
        default_reader.stop().await;
        insert_reader.stop().await;
    }

    #[tokio::test]
    async fn test_custom_destinations_are_isolated() {
        let broker = shared_broker();
        let custom = EventsConfig {
            entity_destination: "pod-a-entity".into(),
            job_destination: "pod-a-job".into(),
            ..EventsConfig::default()
        };
        let writer = Instance::start(broker.clone(), custom.clone());
        let same = Instance::start(broker.clone(), custom);
        let other = Instance::start(broker.clone(), EventsConfig::default());

        let same_seen = RecordingListener::new();
        let other_seen = RecordingListener::new();
        let _r1 = same.service.watch_entities(["Trip"], same_seen.clone());
        let _r2 = other.service.watch_entities(["Trip"], other_seen.clone());

        writer.service.publish(EntityEvent::update("Trip", 1).unwrap());

        wait_until("same destination", || same_seen.len() == 1).await;
        settle().await;
        assert!(other_seen.is_empty());

        writer.stop().await;
        same.stop().await;
        other.stop().await;
    }

    // =========================================================================
    // JOB EVENTS
    // =========================================================================

    #[derive(Default)]
    struct JobLog {
        lines: parking_lot::Mutex<Vec<String>>,
    }

    impl JobEventListener for JobLog {
        fn on_status(&self, job_id: i64, status: JobStatus) -> anyhow::Result<()> {
            self.lines.lock().push(format!("{job_id}:{status:?}"));
            Ok(())
        }

        fn on_progression(&self, job_id: i64, progression: &JobProgression) -> anyhow::Result<()> {
            let percent = progression.percent().unwrap_or_default();
            self.lines.lock().push(format!("{job_id}:{percent}%"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_job_followed_from_another_instance() {
        let broker = shared_broker();
        let worker = Instance::start(broker.clone(), EventsConfig::default());
        let ui = Instance::start(broker.clone(), EventsConfig::default());

        let one_job = Arc::new(JobLog::default());
        let all_jobs = Arc::new(JobLog::default());
        let _r1 = ui.service.watch_job(10, one_job.clone());
        let _r2 = ui.service.watch_all_jobs(all_jobs.clone());

        let jobs = worker.service.job_producer();
        jobs.publish_status(10, JobStatus::Running);
        jobs.publish_progression(10, JobProgression::new("Exporting trips", 1, 4));
        jobs.publish_status(11, JobStatus::Pending);
        jobs.publish_status(10, JobStatus::Success);

        wait_until("job finished", || one_job.lines.lock().len() == 3).await;
        wait_until("all jobs", || all_jobs.lines.lock().len() == 4).await;

        assert_eq!(
            one_job.lines.lock().clone(),
            vec!["10:Running", "10:25%", "10:Success"]
        );

        worker.stop().await;
        ui.stop().await;
    }
}
