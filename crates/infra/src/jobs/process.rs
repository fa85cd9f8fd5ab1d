//! Long-running background processes hosted next to the job workers.

use std::time::Duration;

use busjobs_core::ServerName;

use super::server::PoolSignal;
use super::store::JobStorage;

/// A process the job server runs on its own thread for as long as it is
/// running, e.g. storage housekeeping or a recurring-job trigger.
///
/// `execute` is called again each time it returns, until the server stops.
/// Implementations pace themselves with [`ProcessContext::wait`], which also
/// returns early once stop has been signalled.
pub trait BackgroundProcess: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &ProcessContext<'_>);
}

/// What a background process sees of its server.
pub struct ProcessContext<'a> {
    pub server: &'a ServerName,
    pub storage: &'a dyn JobStorage,
    signal: &'a PoolSignal,
}

impl<'a> ProcessContext<'a> {
    pub(super) fn new(
        server: &'a ServerName,
        storage: &'a dyn JobStorage,
        signal: &'a PoolSignal,
    ) -> Self {
        Self {
            server,
            storage,
            signal,
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.signal.is_stopping()
    }

    /// Sleep up to `timeout`. Returns `true` if the server is stopping.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal.sleep(timeout)
    }
}

/// Runs `tick` every `interval` until the server stops.
pub struct PeriodicProcess<F> {
    name: String,
    interval: Duration,
    tick: F,
}

impl<F> PeriodicProcess<F>
where
    F: Fn(&ProcessContext<'_>) + Send + Sync,
{
    pub fn new(name: impl Into<String>, interval: Duration, tick: F) -> Self {
        Self {
            name: name.into(),
            interval,
            tick,
        }
    }
}

impl<F> BackgroundProcess for PeriodicProcess<F>
where
    F: Fn(&ProcessContext<'_>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &ProcessContext<'_>) {
        (self.tick)(ctx);
        ctx.wait(self.interval);
    }
}

impl<F> core::fmt::Debug for PeriodicProcess<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeriodicProcess")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
