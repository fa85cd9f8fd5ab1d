//! Infrastructure layer: job storage, the background job server and the
//! scheduler that runs it alongside a host bus.

pub mod config;
pub mod jobs;
pub mod scheduler;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod integration_tests;
