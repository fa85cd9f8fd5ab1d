//! Host bus driver: owns a transport, its observers, and runs the lifecycle.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use tracing::{debug, info, warn};

use crate::message::BusMessage;
use crate::observable::{BusObservers, ObserverHandle};
use crate::observer::{Bus, BusFault, BusObserver, BusRef};
use crate::ready::{BusReady, ready_pair};
use crate::transport::Transport;

/// Host lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Started,
    Stopped,
    Faulted,
}

struct TransportBus<B> {
    address: String,
    transport: B,
}

impl<B> Bus for TransportBus<B>
where
    B: Transport<BusMessage>,
{
    fn address(&self) -> &str {
        &self.address
    }

    fn publish(&self, message: BusMessage) -> Result<(), BusFault> {
        self.transport
            .publish(message)
            .map_err(|e| BusFault::Publish(e.to_string()))
    }
}

/// A host bus that notifies [`BusObserver`]s around its own lifecycle.
///
/// The in-memory transport is usable as soon as it is started, so readiness
/// resolves before `post_start` observers are called; observers still await it.
pub struct HostBus {
    bus: BusRef,
    observers: BusObservers,
    state: Mutex<HostState>,
}

impl core::fmt::Debug for HostBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostBus")
            .field("address", &self.bus.address())
            .field("state", &self.state())
            .field("observers", &self.observers)
            .finish()
    }
}

impl HostBus {
    /// Create the bus and notify `observers` (`post_create`, or
    /// `create_faulted` when the address is blank).
    pub fn create<B>(
        address: impl Into<String>,
        transport: B,
        observers: impl IntoIterator<Item = Arc<dyn BusObserver>>,
    ) -> Result<Self, BusFault>
    where
        B: Transport<BusMessage> + 'static,
    {
        let address = address.into();
        let registry = BusObservers::new();
        for observer in observers {
            let _ = registry.connect(observer);
        }

        if address.trim().is_empty() {
            let fault = BusFault::Create("bus address is empty".to_string());
            registry.create_faulted(&fault);
            return Err(fault);
        }

        let bus: BusRef = Arc::new(TransportBus { address, transport });
        registry.post_create(&bus);
        debug!(address = bus.address(), "bus created");

        Ok(Self {
            bus,
            observers: registry,
            state: Mutex::new(HostState::Created),
        })
    }

    pub fn connect_observer(&self, observer: Arc<dyn BusObserver>) -> ObserverHandle {
        self.observers.connect(observer)
    }

    pub fn bus(&self) -> &BusRef {
        &self.bus
    }

    pub fn address(&self) -> &str {
        self.bus.address()
    }

    pub fn state(&self) -> HostState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: HostState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Start the bus. Fails (after notifying `start_faulted`) when any
    /// `pre_start` or `post_start` observer fails.
    pub async fn start(&self) -> anyhow::Result<BusReady> {
        let current = self.state();
        if current != HostState::Created {
            bail!("cannot start bus {} from state {:?}", self.address(), current);
        }

        info!(address = self.address(), "bus starting");

        if let Err(err) = self.observers.pre_start(&self.bus).await {
            return Err(self.fault_start(err).await);
        }

        let (signal, ready) = ready_pair();
        let outcome = BusReady::new(self.address());
        signal.ready(outcome.clone());

        if let Err(err) = self.observers.post_start(&self.bus, &ready).await {
            return Err(self.fault_start(err).await);
        }

        self.set_state(HostState::Started);
        info!(address = self.address(), "bus started");
        Ok(outcome)
    }

    async fn fault_start(&self, err: anyhow::Error) -> anyhow::Error {
        warn!(address = self.address(), error = %err, "bus start faulted");
        let fault = BusFault::Start(err.to_string());
        self.observers.start_faulted(&self.bus, &fault).await;
        self.set_state(HostState::Faulted);
        err
    }

    /// Stop the bus. Stopping an already stopped bus is a no-op.
    pub async fn stop(&self) -> anyhow::Result<()> {
        match self.state() {
            HostState::Started => {}
            HostState::Stopped => return Ok(()),
            other => bail!("cannot stop bus {} from state {:?}", self.address(), other),
        }

        info!(address = self.address(), "bus stopping");

        let result = match self.observers.pre_stop(&self.bus).await {
            Ok(()) => self.observers.post_stop(&self.bus).await,
            Err(err) => Err(err),
        };

        self.set_state(HostState::Stopped);

        if let Err(err) = result {
            warn!(address = self.address(), error = %err, "bus stop faulted");
            let fault = BusFault::Stop(err.to_string());
            self.observers.stop_faulted(&self.bus, &fault).await;
            return Err(err);
        }

        info!(address = self.address(), "bus stopped");
        Ok(())
    }
}
