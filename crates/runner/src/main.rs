//! Runs the scheduler on an in-memory host bus until Ctrl-C.
//!
//! Configuration comes from the `BUSJOBS_*` environment variables (see
//! `busjobs_infra::config`). A demo message is scheduled a few seconds after
//! startup and logged when the bus delivers it.

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;

use busjobs_events::{BusMessage, BusObserver, HostBus, InMemoryTransport, Transport};
use busjobs_infra::config::SchedulerConfig;
use busjobs_infra::jobs::{InMemoryJobStorage, JobComponents, PeriodicProcess, ProcessContext};
use busjobs_infra::scheduler::{MessageScheduler, SchedulerController};

const BUS_ADDRESS: &str = "loopback://localhost/bus";
const DEMO_DESTINATION: &str = "loopback://localhost/reminders";
const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn log_storage_stats(ctx: &ProcessContext<'_>) {
    match ctx.storage.stats() {
        Ok(stats) => tracing::info!(server = %ctx.server, stats = ?stats, "job storage stats"),
        Err(e) => tracing::warn!(server = %ctx.server, error = %e, "job storage stats unavailable"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    busjobs_observability::init();

    let config = SchedulerConfig::from_env().context("invalid BUSJOBS_* configuration")?;
    tracing::info!(config = ?config, "loaded scheduler configuration");

    let storage = Arc::new(InMemoryJobStorage::with_lease(config.lease()));
    let transport = Arc::new(InMemoryTransport::<BusMessage>::new());
    let components = JobComponents::new(storage.clone()).with_background_process(Arc::new(
        PeriodicProcess::new("storage-stats", STATS_INTERVAL, log_storage_stats),
    ));
    let controller = Arc::new(SchedulerController::from_config(config.clone(), components));

    let host = HostBus::create(
        BUS_ADDRESS,
        transport.clone(),
        vec![controller.clone() as Arc<dyn BusObserver>],
    )?;

    // log every message the bus carries
    let subscription = transport.subscribe();
    std::thread::Builder::new()
        .name("bus-listener".to_string())
        .spawn(move || {
            loop {
                match subscription.recv_timeout(Duration::from_secs(1)) {
                    Ok(message) => tracing::info!(
                        destination = message.destination(),
                        message_type = message.message_type(),
                        payload = %message.payload(),
                        "message delivered"
                    ),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("failed to spawn bus listener")?;

    if let Some(queue) = config.queues.first() {
        let scheduler = MessageScheduler::on_queue(storage.clone(), queue.as_str())?;
        let job_id = scheduler.schedule_send(
            DEMO_DESTINATION,
            "DemoReminder",
            serde_json::json!({ "text": "scheduled by busjobs-runner" }),
            chrono::Utc::now() + chrono::Duration::seconds(3),
        )?;
        tracing::info!(job_id = %job_id, queue = %queue, "demo message scheduled");
    }

    host.start().await.context("bus failed to start")?;
    tracing::info!(
        address = host.address(),
        scheduler = ?controller.state(),
        "bus running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    host.stop().await.context("bus failed to stop cleanly")?;
    if let Some(report) = controller.last_dispose_report() {
        tracing::info!(
            drained = report.drained,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scheduler released"
        );
    }
    Ok(())
}
