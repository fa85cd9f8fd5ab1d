//! Background job server: a pool of worker threads polling job storage.
//!
//! Lifecycle: [`BackgroundJobServer::start`] spawns the workers and any
//! background processes and returns a running server;
//! [`BackgroundJobServer::signal_stop`] asks workers to stop claiming and
//! processes to wind down; [`BackgroundJobServer::dispose`] waits, bounded by
//! the configured shutdown timeout, for in-flight work to finish and releases
//! the threads.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Offset, Utc};
use tracing::{debug, error, info, warn};

use busjobs_core::ServerName;

use super::activator::{JobActivator, JobContext};
use super::filter::FilterProvider;
use super::options::{ConfigurationError, JobServerOptions};
use super::process::{BackgroundProcess, ProcessContext};
use super::store::{JobStorage, StorageError};
use super::timezone::TimeZoneResolver;
use super::types::{Job, JobOutcome, JobStatus};

/// Failure to start a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid job server configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Server runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ServerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    /// Jobs that finished after dispose gave up on them; left to lease expiry
    pub jobs_abandoned: u64,
    pub claim_errors: u64,
    pub busy_workers: usize,
    pub uptime_secs: u64,
}

/// What [`BackgroundJobServer::dispose`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposeReport {
    /// Every worker exited within the shutdown timeout
    pub drained: bool,
    /// Worker and process threads still running when the timeout elapsed
    pub abandoned_workers: usize,
    /// The server had already been disposed; nothing was done
    pub already_disposed: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolPhase {
    Launching,
    Running,
    Stopping,
}

/// Phase shared by the server handle and its workers.
///
/// Workers block in `Launching` until `start` has spawned all of them, and
/// sleep between polls on the same condvar so a stop wakes them at once.
#[derive(Debug)]
pub(super) struct PoolSignal {
    phase: Mutex<PoolPhase>,
    changed: Condvar,
}

impl PoolSignal {
    fn new() -> Self {
        Self {
            phase: Mutex::new(PoolPhase::Launching),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) {
        let mut phase = self.lock();
        if *phase == PoolPhase::Launching {
            *phase = PoolPhase::Running;
        }
        self.changed.notify_all();
    }

    /// Returns `true` if this call moved the pool to `Stopping`.
    fn stop(&self) -> bool {
        let mut phase = self.lock();
        let first = *phase != PoolPhase::Stopping;
        *phase = PoolPhase::Stopping;
        self.changed.notify_all();
        first
    }

    pub(super) fn is_stopping(&self) -> bool {
        *self.lock() == PoolPhase::Stopping
    }

    /// Block until launched. `false` means the pool stopped first.
    fn wait_for_launch(&self) -> bool {
        let phase = self
            .changed
            .wait_while(self.lock(), |p| *p == PoolPhase::Launching)
            .unwrap_or_else(PoisonError::into_inner);
        *phase == PoolPhase::Running
    }

    /// Sleep up to `timeout`. `true` means the pool is stopping.
    pub(super) fn sleep(&self, timeout: Duration) -> bool {
        let (phase, _) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, |p| *p == PoolPhase::Running)
            .unwrap_or_else(PoisonError::into_inner);
        *phase == PoolPhase::Stopping
    }
}

struct Shared {
    server: ServerName,
    queues: Vec<String>,
    poll_interval: Duration,
    storage: Arc<dyn JobStorage>,
    activator: Arc<dyn JobActivator>,
    filters: Arc<dyn FilterProvider>,
    time_zones: Arc<dyn TimeZoneResolver>,
    signal: PoolSignal,
    /// Set when dispose times out; late finishers skip reporting
    abandoned: AtomicBool,
    stats: Mutex<ServerStats>,
    started: Instant,
}

impl Shared {
    fn stats(&self) -> MutexGuard<'_, ServerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reports a worker's exit to `dispose`, even if the worker unwinds.
struct ExitNotice {
    index: usize,
    tx: mpsc::Sender<usize>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

/// A running pool of job workers.
///
/// Dropping the server without calling [`dispose`](Self::dispose) signals
/// stop and detaches the workers.
pub struct BackgroundJobServer {
    shared: Arc<Shared>,
    /// Workers first, then one thread per background process
    threads: Vec<Option<thread::JoinHandle<()>>>,
    worker_count: usize,
    processes: Vec<String>,
    exited: mpsc::Receiver<usize>,
    shutdown_timeout: Duration,
    disposed: bool,
}

impl BackgroundJobServer {
    /// Validate `options`, spawn the workers and background processes, and
    /// start polling.
    ///
    /// No job is claimed before this returns.
    pub fn start(
        options: JobServerOptions,
        storage: Arc<dyn JobStorage>,
    ) -> Result<Self, ServerError> {
        options.validate()?;
        let activator = options
            .activator
            .clone()
            .ok_or(ConfigurationError::MissingActivator)?;

        let shared = Arc::new(Shared {
            server: options.server_name.clone(),
            queues: options.queues.clone(),
            poll_interval: options.poll_interval,
            storage,
            activator,
            filters: options.filter_provider.clone(),
            time_zones: options.time_zone_resolver.clone(),
            signal: PoolSignal::new(),
            abandoned: AtomicBool::new(false),
            stats: Mutex::new(ServerStats::default()),
            started: Instant::now(),
        });

        let (exit_tx, exited) = mpsc::channel();
        let total = options.worker_count + options.background_processes.len();
        let mut threads = Vec::with_capacity(total);
        for index in 0..total {
            let thread_shared = shared.clone();
            let notice = ExitNotice {
                index,
                tx: exit_tx.clone(),
            };
            let spawned = match index.checked_sub(options.worker_count) {
                None => thread::Builder::new()
                    .name(format!("job-worker-{index}"))
                    .spawn(move || {
                        let _notice = notice;
                        worker_loop(index, &thread_shared);
                    }),
                Some(slot) => {
                    let process = options.background_processes[slot].clone();
                    thread::Builder::new()
                        .name(format!("job-process-{slot}"))
                        .spawn(move || {
                            let _notice = notice;
                            process_loop(process.as_ref(), &thread_shared);
                        })
                }
            };

            match spawned {
                Ok(handle) => threads.push(Some(handle)),
                Err(e) => {
                    error!(
                        server = %shared.server,
                        thread = index,
                        error = %e,
                        "failed to spawn server thread"
                    );
                    shared.signal.stop();
                    for handle in threads.into_iter().flatten() {
                        let _ = handle.join();
                    }
                    return Err(ServerError::Spawn(e));
                }
            }
        }
        drop(exit_tx);

        let processes: Vec<String> = options
            .background_processes
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        shared.signal.open();
        info!(
            server = %shared.server,
            workers = options.worker_count,
            queues = ?shared.queues,
            processes = ?processes,
            "background job server started"
        );

        Ok(Self {
            shared,
            threads,
            worker_count: options.worker_count,
            processes,
            exited,
            shutdown_timeout: options.shutdown_timeout,
            disposed: false,
        })
    }

    pub fn name(&self) -> &ServerName {
        &self.shared.server
    }

    pub fn queues(&self) -> &[String] {
        &self.shared.queues
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Names of the background processes hosted by this server.
    pub fn processes(&self) -> &[String] {
        &self.processes
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = self.shared.stats().clone();
        stats.uptime_secs = self.shared.started.elapsed().as_secs();
        stats
    }

    /// Stop claiming new jobs and wake background processes so they can
    /// return. In-flight jobs keep running. Idempotent.
    pub fn signal_stop(&self) {
        if self.shared.signal.stop() {
            info!(server = %self.shared.server, "stop signalled to background job server");
        }
    }

    /// Stop the workers and wait for them, at most the shutdown timeout.
    ///
    /// Workers still busy when the timeout elapses are detached; their jobs
    /// are not reported back and become claimable again once their lease
    /// expires. A second call returns immediately.
    pub fn dispose(&mut self) -> DisposeReport {
        let started = Instant::now();
        if self.disposed {
            return DisposeReport {
                drained: true,
                abandoned_workers: 0,
                already_disposed: true,
                elapsed: started.elapsed(),
            };
        }
        self.disposed = true;
        self.signal_stop();

        let deadline = started + self.shutdown_timeout;
        let mut running = self.threads.iter().filter(|t| t.is_some()).count();
        while running > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.exited.recv_timeout(deadline - now) {
                Ok(index) => {
                    running -= 1;
                    let handle = self.threads.get_mut(index).and_then(Option::take);
                    if let Some(handle) = handle {
                        if handle.join().is_err() {
                            warn!(
                                server = %self.shared.server,
                                thread = index,
                                "server thread panicked"
                            );
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    // every notice already received
                    break;
                }
            }
        }

        let abandoned_workers = self.threads.iter().filter(|t| t.is_some()).count();
        if abandoned_workers > 0 {
            self.shared.abandoned.store(true, Ordering::SeqCst);
            warn!(
                server = %self.shared.server,
                abandoned_workers,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "shutdown timeout elapsed; in-flight jobs left to lease expiry"
            );
            // detach
            self.threads.iter_mut().for_each(|t| drop(t.take()));
        }

        let report = DisposeReport {
            drained: abandoned_workers == 0,
            abandoned_workers,
            already_disposed: false,
            elapsed: started.elapsed(),
        };
        info!(
            server = %self.shared.server,
            drained = report.drained,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "background job server disposed"
        );
        report
    }
}

impl Drop for BackgroundJobServer {
    fn drop(&mut self) {
        if !self.disposed {
            self.shared.signal.stop();
        }
    }
}

impl core::fmt::Debug for BackgroundJobServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackgroundJobServer")
            .field("server", &self.shared.server)
            .field("queues", &self.shared.queues)
            .field("workers", &self.worker_count)
            .field("processes", &self.processes)
            .field("disposed", &self.disposed)
            .finish()
    }
}

fn worker_loop(index: usize, shared: &Shared) {
    if !shared.signal.wait_for_launch() {
        return;
    }
    debug!(server = %shared.server, worker = index, "job worker started");

    loop {
        if shared.signal.is_stopping() {
            break;
        }

        match shared.storage.claim_next_due(&shared.queues, &shared.server) {
            Ok(Some(job)) => {
                debug!(
                    server = %shared.server,
                    worker = index,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    "claimed job"
                );
                perform(index, shared, job);
            }
            Ok(None) => {
                if shared.signal.sleep(shared.poll_interval) {
                    break;
                }
            }
            Err(e) => {
                error!(server = %shared.server, worker = index, error = %e, "failed to claim job");
                shared.stats().claim_errors += 1;
                if shared.signal.sleep(shared.poll_interval) {
                    break;
                }
            }
        }
    }

    debug!(server = %shared.server, worker = index, "job worker stopped");
}

fn process_loop(process: &dyn BackgroundProcess, shared: &Shared) {
    if !shared.signal.wait_for_launch() {
        return;
    }
    let ctx = ProcessContext::new(&shared.server, shared.storage.as_ref(), &shared.signal);
    debug!(server = %shared.server, process = process.name(), "background process started");

    while !shared.signal.is_stopping() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| process.execute(&ctx))) {
            error!(
                server = %shared.server,
                process = process.name(),
                panic = panic_message(payload.as_ref()),
                "background process panicked; restarting"
            );
            if shared.signal.sleep(shared.poll_interval) {
                break;
            }
        }
    }

    debug!(server = %shared.server, process = process.name(), "background process stopped");
}

fn perform(index: usize, shared: &Shared, job: Job) {
    let offset = match job.time_zone.as_deref() {
        None => Utc.fix(),
        Some(tz) => shared.time_zones.resolve(tz).unwrap_or_else(|| {
            warn!(job_id = %job.id, time_zone = tz, "unknown time zone; using UTC");
            Utc.fix()
        }),
    };
    let ctx = JobContext {
        server: &shared.server,
        worker: index,
        attempt: job.attempt,
        local_now: Utc::now().with_timezone(&offset),
    };

    shared.stats().busy_workers += 1;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let filters = shared.filters.filters(&job);
        for filter in &filters {
            filter.on_performing(&job, &ctx);
        }
        let outcome = shared.activator.execute(&job, &ctx);
        for filter in filters.iter().rev() {
            filter.on_performed(&job, &ctx, &outcome);
        }
        outcome
    }))
    .unwrap_or_else(|payload| {
        JobOutcome::failed(format!("job panicked: {}", panic_message(payload.as_ref())))
    });

    let abandoned = shared.abandoned.load(Ordering::SeqCst);
    {
        let mut stats = shared.stats();
        stats.busy_workers = stats.busy_workers.saturating_sub(1);
        if abandoned {
            stats.jobs_abandoned += 1;
        } else {
            stats.jobs_processed += 1;
            if outcome.is_success() {
                stats.jobs_succeeded += 1;
            } else {
                stats.jobs_failed += 1;
            }
        }
    }

    if abandoned {
        warn!(
            server = %shared.server,
            job_id = %job.id,
            "job finished after server was disposed; result not recorded"
        );
        return;
    }

    match shared.storage.record_result(&job, outcome) {
        Ok(JobStatus::DeadLettered { error, attempts }) => {
            warn!(job_id = %job.id, attempts, error = %error, "job dead-lettered");
        }
        Ok(JobStatus::Failed { error, attempt }) => {
            debug!(job_id = %job.id, attempt, error = %error, "job failed; retry scheduled");
        }
        Ok(status) => {
            debug!(job_id = %job.id, status = ?status, "job finished");
        }
        Err(StorageError::LeaseLost { holder, .. }) => {
            warn!(
                server = %shared.server,
                job_id = %job.id,
                attempt = job.attempt,
                holder = ?holder,
                "lease expired while job ran; result discarded"
            );
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "failed to record job result");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
