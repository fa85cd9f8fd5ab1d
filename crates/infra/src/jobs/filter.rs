//! Job filters: hooks around each job execution.

use std::sync::Arc;

use super::activator::JobContext;
use super::types::{Job, JobOutcome};

/// Hooks run by the worker around the activator. Both default to no-ops.
///
/// `on_performing` runs in registration order; `on_performed` runs in reverse.
pub trait JobFilter: Send + Sync {
    fn on_performing(&self, _job: &Job, _ctx: &JobContext<'_>) {}

    fn on_performed(&self, _job: &Job, _ctx: &JobContext<'_>, _outcome: &JobOutcome) {}
}

/// Supplies the filters that apply to a given job.
pub trait FilterProvider: Send + Sync {
    fn filters(&self, job: &Job) -> Vec<Arc<dyn JobFilter>>;
}

/// The same filters for every job.
#[derive(Clone, Default)]
pub struct GlobalFilters {
    filters: Vec<Arc<dyn JobFilter>>,
}

impl GlobalFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Arc<dyn JobFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl core::fmt::Debug for GlobalFilters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalFilters")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FilterProvider for GlobalFilters {
    fn filters(&self, _job: &Job) -> Vec<Arc<dyn JobFilter>> {
        self.filters.clone()
    }
}
