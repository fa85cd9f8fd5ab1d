//! Observer registry and hook fan-out for a host bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::observer::{BusFault, BusObserver, BusRef};
use crate::ready::ReadyFuture;

type Entries = Mutex<Vec<(u64, Arc<dyn BusObserver>)>>;

/// Connected observers, called in connection order.
#[derive(Default)]
pub struct BusObservers {
    next_id: AtomicU64,
    entries: Arc<Entries>,
}

/// Returned by [`BusObservers::connect`]; disconnects the observer when
/// [`ObserverHandle::disconnect`] is called. Dropping the handle keeps the
/// observer connected.
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    entries: Weak<Entries>,
}

impl ObserverHandle {
    pub fn disconnect(self) {
        if let Some(entries) = self.entries.upgrade() {
            let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl core::fmt::Debug for BusObservers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusObservers")
            .field("connected", &self.len())
            .finish()
    }
}

impl BusObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, observer: Arc<dyn BusObserver>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push((id, observer));
        ObserverHandle {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Snapshot so no lock is held while hooks run.
    fn snapshot(&self) -> Vec<Arc<dyn BusObserver>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn post_create(&self, bus: &BusRef) {
        for observer in self.snapshot() {
            observer.post_create(bus);
        }
    }

    pub fn create_faulted(&self, fault: &BusFault) {
        for observer in self.snapshot() {
            observer.create_faulted(fault);
        }
    }

    /// Stops at the first failing observer.
    pub async fn pre_start(&self, bus: &BusRef) -> anyhow::Result<()> {
        for observer in self.snapshot() {
            observer.pre_start(bus).await?;
        }
        Ok(())
    }

    /// Every observer receives its own clone of `ready`. Stops at the first
    /// failing observer.
    pub async fn post_start(&self, bus: &BusRef, ready: &ReadyFuture) -> anyhow::Result<()> {
        for observer in self.snapshot() {
            observer.post_start(bus, ready.clone()).await?;
        }
        Ok(())
    }

    pub async fn start_faulted(&self, bus: &BusRef, fault: &BusFault) {
        for observer in self.snapshot() {
            if let Err(err) = observer.start_faulted(bus, fault).await {
                warn!(address = bus.address(), error = ?err, "start-faulted observer failed");
            }
        }
    }

    /// Runs every observer; returns the first failure afterwards.
    pub async fn pre_stop(&self, bus: &BusRef) -> anyhow::Result<()> {
        let mut first_err = None;
        for observer in self.snapshot() {
            if let Err(err) = observer.pre_stop(bus).await {
                warn!(address = bus.address(), error = ?err, "pre-stop observer failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Runs every observer; returns the first failure afterwards.
    pub async fn post_stop(&self, bus: &BusRef) -> anyhow::Result<()> {
        let mut first_err = None;
        for observer in self.snapshot() {
            if let Err(err) = observer.post_stop(bus).await {
                warn!(address = bus.address(), error = ?err, "post-stop observer failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn stop_faulted(&self, bus: &BusRef, fault: &BusFault) {
        for observer in self.snapshot() {
            if let Err(err) = observer.stop_faulted(bus, fault).await {
                warn!(address = bus.address(), error = ?err, "stop-faulted observer failed");
            }
        }
    }
}
