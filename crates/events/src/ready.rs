//! Single-resolution readiness signal handed to observers in `PostStart`.

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::observer::BusFault;

/// Proof that the host bus finished starting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusReady {
    pub address: String,
    pub ready_at: DateTime<Utc>,
}

impl BusReady {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ready_at: Utc::now(),
        }
    }
}

type Slot = Option<Result<BusReady, BusFault>>;

/// Resolving half, owned by the host. Consumed on resolution, so the
/// outcome can be set at most once.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<Slot>,
}

/// Waiting half. Cloneable: every observer gets its own copy and all of them
/// observe the same outcome.
#[derive(Debug, Clone)]
pub struct ReadyFuture {
    rx: watch::Receiver<Slot>,
}

/// Create a connected signal/future pair.
pub fn ready_pair() -> (ReadySignal, ReadyFuture) {
    let (tx, rx) = watch::channel(None);
    (ReadySignal { tx }, ReadyFuture { rx })
}

impl ReadySignal {
    /// Resolve successfully.
    pub fn ready(self, ready: BusReady) {
        self.tx.send_replace(Some(Ok(ready)));
    }

    /// Resolve with a fault.
    pub fn fail(self, fault: BusFault) {
        self.tx.send_replace(Some(Err(fault)));
    }
}

impl ReadyFuture {
    /// A future that is already resolved successfully.
    pub fn resolved(ready: BusReady) -> Self {
        let (signal, future) = ready_pair();
        signal.ready(ready);
        future
    }

    /// A future that is already resolved with a fault.
    pub fn failed(fault: BusFault) -> Self {
        let (signal, future) = ready_pair();
        signal.fail(fault);
        future
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait for the outcome. A signal dropped without resolving yields
    /// [`BusFault::ReadinessDropped`].
    pub async fn wait(mut self) -> Result<BusReady, BusFault> {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or(Err(BusFault::ReadinessDropped));
            }
        }
    }
}

impl IntoFuture for ReadyFuture {
    type Output = Result<BusReady, BusFault>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
