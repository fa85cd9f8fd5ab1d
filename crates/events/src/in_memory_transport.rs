//! Process-local transport for the runner and tests.

use std::sync::{Mutex, mpsc};

use crate::transport::{Subscription, Transport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryTransportError {
    #[error("in-memory transport subscriber list is poisoned")]
    Poisoned,
}

/// Copies each published message into every open subscription's channel.
///
/// Publishing never blocks on slow subscribers. Subscriptions that have been
/// dropped are forgotten on the next publish.
#[derive(Debug)]
pub struct InMemoryTransport<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryTransport<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open subscriptions, counting dropped ones not yet seen by a publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map_or(0, |senders| senders.len())
    }
}

impl<M> Default for InMemoryTransport<M> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> Transport<M> for InMemoryTransport<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryTransportError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self
            .senders
            .lock()
            .map_err(|_| InMemoryTransportError::Poisoned)?;
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        // a poisoned list yields a subscription that never receives
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(sender);
        }
        receiver.into()
    }
}
