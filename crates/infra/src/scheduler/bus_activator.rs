//! Activator that delivers scheduled messages to the host bus.

use busjobs_events::{BusMessage, BusRef};
use tracing::debug;

use crate::jobs::activator::{JobActivator, JobContext};
use crate::jobs::types::{Job, JobKind, JobOutcome};

/// Publishes `ScheduledMessage` jobs to the bus they were scheduled on.
///
/// Custom jobs are not understood and fail; pair it with a
/// [`HandlerActivator`](crate::jobs::activator::HandlerActivator) fallback to
/// run both.
#[derive(Clone)]
pub struct BusActivator {
    bus: BusRef,
}

impl BusActivator {
    pub fn new(bus: BusRef) -> Self {
        Self { bus }
    }
}

impl core::fmt::Debug for BusActivator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusActivator")
            .field("bus", &self.bus.address())
            .finish()
    }
}

impl JobActivator for BusActivator {
    fn execute(&self, job: &Job, ctx: &JobContext<'_>) -> JobOutcome {
        match &job.kind {
            JobKind::ScheduledMessage {
                destination,
                message_type,
            } => {
                let message = BusMessage::new(
                    destination.as_str(),
                    message_type.as_str(),
                    job.payload.clone(),
                );
                match self.bus.publish(message) {
                    Ok(()) => {
                        debug!(
                            server = %ctx.server,
                            job_id = %job.id,
                            destination = destination.as_str(),
                            "scheduled message sent"
                        );
                        JobOutcome::Succeeded
                    }
                    Err(fault) => JobOutcome::failed(fault.to_string()),
                }
            }
            JobKind::Custom { kind } => {
                JobOutcome::failed(format!("bus activator cannot run job type: {kind}"))
            }
        }
    }
}
