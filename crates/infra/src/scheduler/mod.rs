//! Scheduler wiring: a background job server tied to a host bus lifecycle,
//! and the client used to schedule messages on it.

pub mod bus_activator;
pub mod client;
pub mod controller;

pub use bus_activator::BusActivator;
pub use client::MessageScheduler;
pub use controller::{ConfigureServer, LifecycleState, SchedulerController, SchedulerError};
