//! Delivery layer underneath a host bus.
//!
//! A [`Transport`] moves messages from the bus to whoever listens on it. The
//! host bus only publishes through it; reading is left to subscribers, which
//! each get their own [`Subscription`].
//!
//! A transport holds no scheduled work. A scheduled send reaches the
//! transport only when its job runs, and a publish error fails that job
//! attempt so the job store can retry it.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of a transport.
///
/// Every subscription sees every message published after it was opened.
/// A listener thread typically polls with a timeout so it can notice
/// shutdown:
///
/// ```ignore
/// let deliveries = transport.subscribe();
/// loop {
///     match deliveries.recv_timeout(Duration::from_secs(1)) {
///         Ok(message) => dispatch(message),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> From<Receiver<M>> for Subscription<M> {
    fn from(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }
}

impl<M> Subscription<M> {
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Next message if one is already queued.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Carries messages published on a host bus.
///
/// Job workers publish from their own threads, so implementations are shared
/// across threads and `publish` may be called concurrently.
pub trait Transport<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, T> Transport<M> for Arc<T>
where
    T: Transport<M> + ?Sized,
{
    type Error = T::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        T::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        T::subscribe(self)
    }
}
