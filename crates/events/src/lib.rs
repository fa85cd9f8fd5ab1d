//! Host bus abstractions: pub/sub transport, bus messages and the lifecycle
//! observer contract used to attach components to a bus.

pub mod host;
pub mod in_memory_transport;
pub mod message;
pub mod observable;
pub mod observer;
pub mod ready;
pub mod transport;

pub use host::{HostBus, HostState};
pub use in_memory_transport::{InMemoryTransport, InMemoryTransportError};
pub use message::BusMessage;
pub use observable::{BusObservers, ObserverHandle};
pub use observer::{Bus, BusFault, BusObserver, BusRef};
pub use ready::{BusReady, ReadyFuture, ReadySignal, ready_pair};
pub use transport::{Subscription, Transport};
