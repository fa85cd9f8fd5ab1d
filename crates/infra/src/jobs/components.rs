//! The set of shared components a scheduler builds its job server from.

use std::sync::Arc;

use super::filter::{FilterProvider, GlobalFilters};
use super::options::JobServerOptions;
use super::process::BackgroundProcess;
use super::store::JobStorage;
use super::timezone::{TimeZoneResolver, UtcResolver};

/// Supplies the storage and server-wide components of a job server.
///
/// Resolved each time a server is built, so an implementation backed by a
/// container can hand out fresh instances.
pub trait ComponentResolver: Send + Sync {
    fn storage(&self) -> Arc<dyn JobStorage>;

    fn time_zone_resolver(&self) -> Arc<dyn TimeZoneResolver> {
        Arc::new(UtcResolver)
    }

    fn filter_provider(&self) -> Arc<dyn FilterProvider> {
        Arc::new(GlobalFilters::new())
    }

    /// Processes run alongside the workers
    fn background_processes(&self) -> Vec<Arc<dyn BackgroundProcess>> {
        Vec::new()
    }

    /// Copy the resolved components into `options`.
    fn apply(&self, options: &mut JobServerOptions) {
        options.time_zone_resolver = self.time_zone_resolver();
        options.filter_provider = self.filter_provider();
        options.background_processes = self.background_processes();
    }
}

/// Fixed component set.
#[derive(Clone)]
pub struct JobComponents {
    storage: Arc<dyn JobStorage>,
    time_zone_resolver: Arc<dyn TimeZoneResolver>,
    filter_provider: Arc<dyn FilterProvider>,
    background_processes: Vec<Arc<dyn BackgroundProcess>>,
}

impl JobComponents {
    /// `storage` with UTC time zones, no filters and no extra processes.
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self {
            storage,
            time_zone_resolver: Arc::new(UtcResolver),
            filter_provider: Arc::new(GlobalFilters::new()),
            background_processes: Vec::new(),
        }
    }

    pub fn with_time_zone_resolver(mut self, resolver: Arc<dyn TimeZoneResolver>) -> Self {
        self.time_zone_resolver = resolver;
        self
    }

    pub fn with_filter_provider(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.filter_provider = provider;
        self
    }

    pub fn with_background_process(mut self, process: Arc<dyn BackgroundProcess>) -> Self {
        self.background_processes.push(process);
        self
    }
}

impl ComponentResolver for JobComponents {
    fn storage(&self) -> Arc<dyn JobStorage> {
        self.storage.clone()
    }

    fn time_zone_resolver(&self) -> Arc<dyn TimeZoneResolver> {
        self.time_zone_resolver.clone()
    }

    fn filter_provider(&self) -> Arc<dyn FilterProvider> {
        self.filter_provider.clone()
    }

    fn background_processes(&self) -> Vec<Arc<dyn BackgroundProcess>> {
        self.background_processes.clone()
    }
}

impl core::fmt::Debug for JobComponents {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let processes: Vec<&str> = self.background_processes.iter().map(|p| p.name()).collect();
        f.debug_struct("JobComponents")
            .field("background_processes", &processes)
            .finish_non_exhaustive()
    }
}
