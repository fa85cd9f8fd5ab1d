//! Lifecycle observer contract for components attached to a host bus.
//!
//! A host bus calls its observers at six points of its own lifecycle. Every
//! hook has a no-op default, so observers only override what they react to.
//!
//! | Hook | Invoked when |
//! |---|---|
//! | `post_create` / `create_faulted` | the bus object was (not) constructed |
//! | `pre_start` | the bus is about to start |
//! | `post_start` | the bus began starting; `ready` resolves once it is usable |
//! | `start_faulted` | the bus failed to start |
//! | `pre_stop` | the bus is about to stop |
//! | `post_stop` / `stop_faulted` | the bus stopped (or failed while stopping) |
//!
//! The host serializes hook calls for one bus:
//! `pre_start` → `post_start` → `pre_stop` → `post_stop`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::BusMessage;
use crate::ready::ReadyFuture;

/// Failure reported by (or to) a host bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusFault {
    #[error("bus creation failed: {0}")]
    Create(String),
    #[error("bus start failed: {0}")]
    Start(String),
    #[error("bus stop failed: {0}")]
    Stop(String),
    #[error("bus not ready: {0}")]
    NotReady(String),
    #[error("bus readiness signal dropped before resolving")]
    ReadinessDropped,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// The view of a host bus handed to observers.
pub trait Bus: Send + Sync {
    /// Input address of the bus.
    fn address(&self) -> &str;

    fn publish(&self, message: BusMessage) -> Result<(), BusFault>;
}

pub type BusRef = Arc<dyn Bus>;

/// Lifecycle hooks. All default to no-ops.
///
/// Async hooks return `anyhow::Result` so observers can surface their own error
/// types to the host. Only the start path is expected to fail; stop hooks
/// should log and return `Ok`.
#[async_trait]
pub trait BusObserver: Send + Sync {
    fn post_create(&self, _bus: &BusRef) {}

    fn create_faulted(&self, _fault: &BusFault) {}

    async fn pre_start(&self, _bus: &BusRef) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_start(&self, _bus: &BusRef, _ready: ReadyFuture) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_faulted(&self, _bus: &BusRef, _fault: &BusFault) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_stop(&self, _bus: &BusRef) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_stop(&self, _bus: &BusRef) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop_faulted(&self, _bus: &BusRef, _fault: &BusFault) -> anyhow::Result<()> {
        Ok(())
    }
}
