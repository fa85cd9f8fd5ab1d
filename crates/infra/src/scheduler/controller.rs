//! Scheduler controller: runs a [`BackgroundJobServer`] in step with a host bus.
//!
//! ## State machine
//!
//! ```text
//! Created --post_start--> Starting --ready--> Running --pre_stop--> Stopping --post_stop--> Stopped
//!    \___________________________\________________\___start_faulted / start failure___> Faulted
//! ```
//!
//! - Options are built and validated in `post_start` before readiness is
//!   awaited; the server itself is started only once the bus is ready.
//! - `pre_stop` only signals the server; `post_stop`/`stop_faulted` dispose it.
//! - The server handle is moved out of the controller to dispose it, so each
//!   server is disposed exactly once whatever order the stop hooks arrive in.
//! - `Stopped` and `Faulted` are terminal; a controller never restarts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::field::{Empty, display};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use busjobs_core::{IdGenerator, ServerName, UuidV7Generator};
use busjobs_events::{BusFault, BusObserver, BusRef, ReadyFuture};

use crate::config::SchedulerConfig;
use crate::jobs::components::ComponentResolver;
use crate::jobs::options::{ConfigurationError, JobServerOptions};
use crate::jobs::server::{BackgroundJobServer, DisposeReport, ServerError, ServerStats};

use super::bus_activator::BusActivator;

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Faulted)
    }
}

/// Failure surfaced to the host from `post_start`.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("job server failed to start: {0}")]
    Server(#[from] ServerError),
    #[error("host bus did not become ready: {0}")]
    NotReady(#[source] BusFault),
    #[error("scheduler cannot {operation} from state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// Customization applied to the server options after components and config.
pub type ConfigureServer = Box<dyn Fn(&mut JobServerOptions) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: LifecycleState,
    server: Option<BackgroundJobServer>,
    server_name: Option<ServerName>,
    last_dispose: Option<DisposeReport>,
}

/// Bus observer owning at most one background job server.
pub struct SchedulerController {
    address: String,
    components: Arc<dyn ComponentResolver>,
    ids: Arc<dyn IdGenerator>,
    config: Option<SchedulerConfig>,
    configure: Option<ConfigureServer>,
    inner: Mutex<Inner>,
    span: Span,
}

impl SchedulerController {
    /// Controller for the scheduler endpoint at `address`. Storage, time
    /// zones, filters and background processes come from `components`.
    pub fn new(address: impl Into<String>, components: impl ComponentResolver + 'static) -> Self {
        let address = address.into();
        let span = info_span!("scheduler", address = %address, server = Empty);
        Self {
            address,
            components: Arc::new(components),
            ids: Arc::new(UuidV7Generator),
            config: None,
            configure: None,
            inner: Mutex::new(Inner {
                state: LifecycleState::Created,
                server: None,
                server_name: None,
                last_dispose: None,
            }),
            span,
        }
    }

    /// Controller whose address and server settings come from `config`.
    pub fn from_config(
        config: SchedulerConfig,
        components: impl ComponentResolver + 'static,
    ) -> Self {
        Self::new(config.scheduler_address.clone(), components).with_config(config)
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Adjust the server options before the server is started.
    ///
    /// Runs after components and config are applied. If the callback leaves
    /// `activator` unset, a [`BusActivator`] for the host bus is used.
    pub fn configure_server<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut JobServerOptions) + Send + Sync + 'static,
    {
        self.configure = Some(Box::new(configure));
        self
    }

    /// Replace the logging span hooks run in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Name of the server, once `post_start` has built its options.
    pub fn server_name(&self) -> Option<ServerName> {
        self.lock().server_name.clone()
    }

    /// Stats of the live server, if there is one.
    pub fn server_stats(&self) -> Option<ServerStats> {
        self.lock().server.as_ref().map(BackgroundJobServer::stats)
    }

    /// Report of the one disposal this controller performed, if any.
    pub fn last_dispose_report(&self) -> Option<DisposeReport> {
        self.lock().last_dispose
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Faulted` unless already terminal, handing back any server.
    fn fault(&self) -> Option<BackgroundJobServer> {
        let mut inner = self.lock();
        if !inner.state.is_terminal() {
            inner.state = LifecycleState::Faulted;
        }
        inner.server.take()
    }

    fn build_options(&self, bus: &BusRef) -> Result<JobServerOptions, ConfigurationError> {
        let mut options = JobServerOptions::new(self.ids.as_ref());
        self.components.apply(&mut options);
        if let Some(config) = &self.config {
            config.apply(&mut options);
        }
        if let Some(configure) = &self.configure {
            configure(&mut options);
        }
        if options.activator.is_none() {
            options.activator = Some(Arc::new(BusActivator::new(bus.clone())));
        }
        options.validate()?;
        Ok(options)
    }

    async fn start_scheduler(
        &self,
        bus: &BusRef,
        ready: ReadyFuture,
    ) -> Result<(), SchedulerError> {
        {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Created {
                return Err(SchedulerError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.state = LifecycleState::Starting;
        }

        let options = self.build_options(bus).inspect_err(|e| {
            error!(address = %self.address, error = %e, "scheduler configuration rejected");
            self.fault();
        })?;
        self.span.record("server", display(&options.server_name));
        self.lock().server_name = Some(options.server_name.clone());

        info!(address = %self.address, "scheduler starting");

        if let Err(fault) = ready.wait().await {
            warn!(
                address = %self.address,
                error = %fault,
                "bus never became ready; scheduler not started"
            );
            self.fault();
            return Err(SchedulerError::NotReady(fault));
        }

        let server = BackgroundJobServer::start(options, self.components.storage())
            .inspect_err(|e| {
                error!(address = %self.address, error = %e, "job server failed to start");
                self.fault();
            })?;

        let stranded = {
            let mut inner = self.lock();
            if inner.state == LifecycleState::Starting {
                inner.server = Some(server);
                inner.state = LifecycleState::Running;
                None
            } else {
                Some((server, inner.state))
            }
        };
        if let Some((server, state)) = stranded {
            self.dispose_server(server).await;
            return Err(SchedulerError::InvalidState {
                operation: "finish starting",
                state,
            });
        }

        info!(address = %self.address, "scheduler started");
        Ok(())
    }

    async fn stop_scheduler(&self, hook: &'static str) {
        let server = {
            let mut inner = self.lock();
            if !inner.state.is_terminal() {
                inner.state = LifecycleState::Stopped;
            }
            inner.server.take()
        };

        match server {
            Some(server) => {
                self.dispose_server(server).await;
                info!(address = %self.address, hook, "scheduler stopped");
            }
            None => debug!(address = %self.address, hook, "no job server to dispose"),
        }
    }

    /// Dispose on the blocking pool; waits out the server's grace period.
    async fn dispose_server(&self, mut server: BackgroundJobServer) {
        let report = match tokio::task::spawn_blocking(move || server.dispose()).await {
            Ok(report) => report,
            Err(e) => {
                error!(address = %self.address, error = %e, "job server disposal failed");
                return;
            }
        };

        if !report.drained {
            warn!(
                address = %self.address,
                abandoned_workers = report.abandoned_workers,
                "job server disposed before in-flight jobs finished"
            );
        }
        self.lock().last_dispose = Some(report);
    }
}

impl core::fmt::Debug for SchedulerController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SchedulerController")
            .field("address", &self.address)
            .field("state", &inner.state)
            .field("server_name", &inner.server_name)
            .field("configured", &self.configure.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BusObserver for SchedulerController {
    fn post_create(&self, bus: &BusRef) {
        let _entered = self.span.enter();
        debug!(bus = bus.address(), "bus created");
    }

    fn create_faulted(&self, fault: &BusFault) {
        let _entered = self.span.enter();
        debug!(error = %fault, "bus creation faulted");
    }

    async fn pre_start(&self, bus: &BusRef) -> anyhow::Result<()> {
        let _entered = self.span.enter();
        debug!(bus = bus.address(), "bus starting");
        Ok(())
    }

    async fn post_start(&self, bus: &BusRef, ready: ReadyFuture) -> anyhow::Result<()> {
        self.start_scheduler(bus, ready)
            .instrument(self.span.clone())
            .await?;
        Ok(())
    }

    async fn start_faulted(&self, _bus: &BusRef, fault: &BusFault) -> anyhow::Result<()> {
        async {
            warn!(address = %self.address, error = %fault, "bus start faulted");
            if let Some(server) = self.fault() {
                self.dispose_server(server).await;
            }
        }
        .instrument(self.span.clone())
        .await;
        Ok(())
    }

    async fn pre_stop(&self, _bus: &BusRef) -> anyhow::Result<()> {
        let _entered = self.span.enter();
        let mut inner = self.lock();
        match (inner.state, inner.server.as_ref()) {
            (LifecycleState::Running, Some(server)) => {
                server.signal_stop();
                inner.state = LifecycleState::Stopping;
                info!(address = %self.address, "scheduler paused");
            }
            (state, _) => debug!(?state, "nothing to pause"),
        }
        Ok(())
    }

    async fn post_stop(&self, _bus: &BusRef) -> anyhow::Result<()> {
        self.stop_scheduler("post_stop")
            .instrument(self.span.clone())
            .await;
        Ok(())
    }

    async fn stop_faulted(&self, _bus: &BusRef, fault: &BusFault) -> anyhow::Result<()> {
        async {
            warn!(address = %self.address, error = %fault, "bus stop faulted; releasing scheduler");
            self.stop_scheduler("stop_faulted").await;
        }
        .instrument(self.span.clone())
        .await;
        Ok(())
    }
}
