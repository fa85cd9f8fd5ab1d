//! Integration tests for the scheduler running inside a host bus.
//!
//! Tests: MessageScheduler → JobStorage → BackgroundJobServer → BusActivator → host bus
//!
//! Verifies:
//! - Scheduled sends are delivered to bus subscribers once the bus is started
//! - Sends that are not due, or cancelled, are never delivered
//! - A failed host start leaves no job server running
//! - Jobs abandoned at shutdown are recovered through lease expiry
//! - A worker whose lease expired cannot finish the job another server reclaimed

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use busjobs_core::SequentialIdGenerator;
    use busjobs_events::{
        BusMessage, BusObserver, BusRef, HostBus, HostState, InMemoryTransport, ReadyFuture,
        Transport,
    };

    use crate::config::SchedulerConfig;
    use crate::jobs::{
        BackgroundJobServer, HandlerActivator, InMemoryJobStorage, Job, JobComponents, JobKind,
        JobOutcome, JobServerOptions, JobStatus, JobStorage, RetryPolicy, activator_fn,
    };
    use crate::scheduler::{LifecycleState, MessageScheduler, SchedulerController};
    use crate::testing::wait_until;

    const BUS_ADDRESS: &str = "loopback://local/bus";

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            scheduler_address: "loopback://local/scheduler".to_string(),
            worker_count: Some(2),
            poll_interval_ms: 10,
            shutdown_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn setup(
        storage: Arc<InMemoryJobStorage>,
    ) -> (HostBus, Arc<SchedulerController>, Arc<InMemoryTransport<BusMessage>>) {
        let transport = Arc::new(InMemoryTransport::new());
        let controller = Arc::new(
            SchedulerController::from_config(fast_config(), JobComponents::new(storage))
                .with_id_generator(Arc::new(SequentialIdGenerator::new())),
        );
        let host = HostBus::create(
            BUS_ADDRESS,
            transport.clone(),
            vec![controller.clone() as Arc<dyn BusObserver>],
        )
        .unwrap();
        (host, controller, transport)
    }

    #[tokio::test]
    async fn scheduled_send_is_delivered_after_bus_starts() {
        let storage = InMemoryJobStorage::arc();
        let (host, controller, transport) = setup(storage.clone());
        let subscription = transport.subscribe();

        let id = MessageScheduler::new(storage.clone())
            .schedule_send(
                "loopback://local/orders",
                "OrderReminder",
                serde_json::json!({"order": 42}),
                Utc::now(),
            )
            .unwrap();

        // nothing runs before the bus is started
        assert!(matches!(
            subscription.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Timeout)
        ));

        host.start().await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);

        let message = subscription.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.destination(), "loopback://local/orders");
        assert_eq!(message.message_type(), "OrderReminder");
        assert_eq!(message.payload(), &serde_json::json!({"order": 42}));

        host.stop().await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(storage.get(id).unwrap().unwrap().status, JobStatus::Completed);
        assert!(controller.last_dispose_report().unwrap().drained);
    }

    #[tokio::test]
    async fn future_and_cancelled_sends_are_not_delivered() {
        let storage = InMemoryJobStorage::arc();
        let (host, _controller, transport) = setup(storage.clone());
        let subscription = transport.subscribe();
        let scheduler = MessageScheduler::new(storage.clone());

        scheduler
            .schedule_send(
                "loopback://local/orders",
                "Later",
                serde_json::Value::Null,
                Utc::now() + chrono::Duration::hours(1),
            )
            .unwrap();
        let cancelled = scheduler
            .schedule_send(
                "loopback://local/orders",
                "Never",
                serde_json::Value::Null,
                Utc::now(),
            )
            .unwrap();
        scheduler.cancel_scheduled_send(cancelled).unwrap();

        host.start().await.unwrap();
        assert!(matches!(
            subscription.recv_timeout(Duration::from_millis(150)),
            Err(RecvTimeoutError::Timeout)
        ));
        host.stop().await.unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed, 0);
    }

    struct RefusingObserver;

    #[async_trait]
    impl BusObserver for RefusingObserver {
        async fn post_start(&self, _bus: &BusRef, _ready: ReadyFuture) -> anyhow::Result<()> {
            anyhow::bail!("downstream component refused to start")
        }
    }

    #[tokio::test]
    async fn failed_host_start_leaves_no_server_running() {
        let storage = InMemoryJobStorage::arc();
        let (host, controller, _transport) = setup(storage);
        let _handle = host.connect_observer(Arc::new(RefusingObserver));

        assert!(host.start().await.is_err());
        assert_eq!(host.state(), HostState::Faulted);
        assert_eq!(controller.state(), LifecycleState::Faulted);
        assert!(controller.server_stats().is_none());
        assert!(controller.last_dispose_report().is_some());
    }

    #[tokio::test]
    async fn failing_custom_job_is_dead_lettered_and_pool_keeps_running() {
        let storage = InMemoryJobStorage::arc();
        let transport = Arc::new(InMemoryTransport::<BusMessage>::new());
        let controller = Arc::new(
            SchedulerController::from_config(fast_config(), JobComponents::new(storage.clone()))
                .configure_server(|options| {
                    options.activator = Some(Arc::new(
                        HandlerActivator::new()
                            .with_handler("report.*", |_, _| {
                                JobOutcome::failed("report engine offline")
                            })
                            .with_handler("ping", |_, _| JobOutcome::Succeeded),
                    ));
                }),
        );
        let host = HostBus::create(
            BUS_ADDRESS,
            transport,
            vec![controller.clone() as Arc<dyn BusObserver>],
        )
        .unwrap();

        let failing = storage
            .enqueue(
                Job::new(
                    "mt-message-queue",
                    JobKind::custom("report.daily"),
                    serde_json::Value::Null,
                )
                .with_retry_policy(RetryPolicy::no_retry()),
            )
            .unwrap();
        let ping = storage
            .enqueue(Job::new("mt-message-queue", JobKind::custom("ping"), serde_json::Value::Null))
            .unwrap();

        host.start().await.unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            let stats = storage.stats().unwrap();
            stats.dead_lettered == 1 && stats.completed == 1
        }));
        host.stop().await.unwrap();

        let dead = storage.list_dead_letters(10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.id, failing);
        assert_eq!(dead[0].reason, "report engine offline");
        assert_eq!(storage.get(ping).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn job_abandoned_at_shutdown_is_reclaimed_after_lease_expiry() {
        let storage: Arc<dyn JobStorage> =
            Arc::new(InMemoryJobStorage::with_lease(Duration::from_millis(200)));
        let id = storage
            .enqueue(Job::new("default", JobKind::custom("slow"), serde_json::Value::Null))
            .unwrap();
        let ids = SequentialIdGenerator::new();

        let slow = JobServerOptions::new(&ids)
            .with_queues(["default"])
            .with_worker_count(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_millis(20))
            .with_activator(Arc::new(activator_fn(|_, _| {
                std::thread::sleep(Duration::from_millis(500));
                JobOutcome::Succeeded
            })));
        let mut first = BackgroundJobServer::start(slow, storage.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            matches!(storage.get(id).unwrap().unwrap().status, JobStatus::Processing)
        }));
        let report = first.dispose();
        assert!(!report.drained);

        let fast = JobServerOptions::new(&ids)
            .with_queues(["default"])
            .with_worker_count(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_activator(Arc::new(activator_fn(|_, _| JobOutcome::Succeeded)));
        let mut second = BackgroundJobServer::start(fast, storage.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            storage.get(id).unwrap().unwrap().status == JobStatus::Completed
        }));
        second.dispose();

        let job = storage.get(id).unwrap().unwrap();
        assert_eq!(job.attempt, 2);
        // the abandoned first attempt never finished, so only the reclaim is in history
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].server.as_ref(), Some(second.name()));
    }

    #[test]
    fn stale_worker_cannot_finish_a_reclaimed_job() {
        let storage: Arc<dyn JobStorage> =
            Arc::new(InMemoryJobStorage::with_lease(Duration::from_millis(50)));
        let id = storage
            .enqueue(Job::new("default", JobKind::custom("slow"), serde_json::Value::Null))
            .unwrap();
        let ids = SequentialIdGenerator::new();

        let slow = JobServerOptions::new(&ids)
            .with_queues(["default"])
            .with_worker_count(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_activator(Arc::new(activator_fn(|_, _| {
                std::thread::sleep(Duration::from_millis(300));
                JobOutcome::failed("stale attempt")
            })));
        let mut first = BackgroundJobServer::start(slow, storage.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            matches!(storage.get(id).unwrap().unwrap().status, JobStatus::Processing)
        }));

        let fast = JobServerOptions::new(&ids)
            .with_queues(["default"])
            .with_worker_count(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_activator(Arc::new(activator_fn(|_, _| JobOutcome::Succeeded)));
        let mut second = BackgroundJobServer::start(fast, storage.clone()).unwrap();

        // the first server keeps running and finishes after the reclaim
        assert!(wait_until(Duration::from_secs(5), || {
            first.stats().jobs_processed == 1
        }));
        first.dispose();
        second.dispose();

        let job = storage.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt, 2);
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].server.as_ref(), Some(second.name()));
        assert!(job.history[0].error.is_none());
    }
}
