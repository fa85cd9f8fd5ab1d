//! Job activation: turning a claimed job into work.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use busjobs_core::ServerName;

use super::types::{Job, JobOutcome};

/// Execution context handed to activators and filters.
#[derive(Debug, Clone)]
pub struct JobContext<'a> {
    pub server: &'a ServerName,
    /// Index of the worker running the job
    pub worker: usize,
    pub attempt: u32,
    /// Current time in the job's time zone
    pub local_now: DateTime<FixedOffset>,
}

/// Resolves a job to its work item and runs it.
///
/// Failures are reported through [`JobOutcome`]; a panic is caught by the
/// worker and recorded as a failure.
pub trait JobActivator: Send + Sync {
    fn execute(&self, job: &Job, ctx: &JobContext<'_>) -> JobOutcome;
}

impl<A> JobActivator for Arc<A>
where
    A: JobActivator + ?Sized,
{
    fn execute(&self, job: &Job, ctx: &JobContext<'_>) -> JobOutcome {
        (**self).execute(job, ctx)
    }
}

/// Activator backed by a closure.
pub struct FnActivator<F>(F);

/// Wrap a closure as an activator.
pub fn activator_fn<F>(f: F) -> FnActivator<F>
where
    F: Fn(&Job, &JobContext<'_>) -> JobOutcome + Send + Sync,
{
    FnActivator(f)
}

impl<F> JobActivator for FnActivator<F>
where
    F: Fn(&Job, &JobContext<'_>) -> JobOutcome + Send + Sync,
{
    fn execute(&self, job: &Job, ctx: &JobContext<'_>) -> JobOutcome {
        (self.0)(job, ctx)
    }
}

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job, &JobContext<'_>) -> JobOutcome + Send + Sync>;

/// Activator dispatching on [`JobKind::type_name`](super::types::JobKind::type_name).
///
/// Lookup order: exact name, `prefix.*` pattern, `*`, then the fallback
/// activator if one is set.
#[derive(Default)]
pub struct HandlerActivator {
    handlers: HashMap<String, JobHandler>,
    fallback: Option<Arc<dyn JobActivator>>,
}

impl HandlerActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type name or pattern.
    pub fn register_handler<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job, &JobContext<'_>) -> JobOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.into(), Box::new(handler));
    }

    pub fn with_handler<F>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Job, &JobContext<'_>) -> JobOutcome + Send + Sync + 'static,
    {
        self.register_handler(pattern, handler);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn JobActivator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn handler_for(&self, type_name: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        // "billing.*" matches "billing.invoice_overdue"
        let by_prefix = self.handlers.iter().find(|(pattern, _)| {
            pattern
                .strip_suffix(".*")
                .is_some_and(|prefix| type_name.starts_with(prefix))
        });
        if let Some((_, h)) = by_prefix {
            return Some(h);
        }

        self.handlers.get("*")
    }
}

impl core::fmt::Debug for HandlerActivator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut patterns: Vec<_> = self.handlers.keys().collect();
        patterns.sort();
        f.debug_struct("HandlerActivator")
            .field("patterns", &patterns)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl JobActivator for HandlerActivator {
    fn execute(&self, job: &Job, ctx: &JobContext<'_>) -> JobOutcome {
        if let Some(handler) = self.handler_for(job.kind.type_name()) {
            return handler(job, ctx);
        }
        match &self.fallback {
            Some(fallback) => fallback.execute(job, ctx),
            None => {
                JobOutcome::failed(format!("no handler for job type: {}", job.kind.type_name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::jobs::types::JobKind;

    fn run(activator: &dyn JobActivator, kind: JobKind) -> JobOutcome {
        let server: ServerName = "worker-a".parse().unwrap();
        let job = Job::new("default", kind, serde_json::json!({}));
        let ctx = JobContext {
            server: &server,
            worker: 0,
            attempt: 1,
            local_now: Utc::now().fixed_offset(),
        };
        activator.execute(&job, &ctx)
    }

    #[test]
    fn exact_handler_wins_over_patterns() {
        let activator = HandlerActivator::new()
            .with_handler("billing.invoice", |_, _| JobOutcome::Succeeded)
            .with_handler("billing.*", |_, _| JobOutcome::failed("pattern"))
            .with_handler("*", |_, _| JobOutcome::failed("wildcard"));

        assert_eq!(run(&activator, JobKind::custom("billing.invoice")), JobOutcome::Succeeded);
        assert_eq!(
            run(&activator, JobKind::custom("billing.refund")),
            JobOutcome::failed("pattern")
        );
        assert_eq!(run(&activator, JobKind::custom("other")), JobOutcome::failed("wildcard"));
    }

    #[test]
    fn unknown_type_uses_fallback_then_fails() {
        let bare = HandlerActivator::new();
        assert!(matches!(
            run(&bare, JobKind::custom("nope")),
            JobOutcome::Failed(msg) if msg.contains("nope")
        ));

        let with_fallback = HandlerActivator::new()
            .with_fallback(Arc::new(activator_fn(|_, _| JobOutcome::Succeeded)));
        assert_eq!(run(&with_fallback, JobKind::custom("nope")), JobOutcome::Succeeded);
    }

    #[test]
    fn handlers_see_the_context() {
        let activator = activator_fn(|job: &Job, ctx: &JobContext<'_>| {
            if ctx.attempt == 1 && ctx.server.as_str() == "worker-a" && job.queue == "default" {
                JobOutcome::Succeeded
            } else {
                JobOutcome::failed("unexpected context")
            }
        });
        assert_eq!(run(&activator, JobKind::custom("any")), JobOutcome::Succeeded);
    }
}
