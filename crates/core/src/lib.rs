//! `busjobs-core` — identifiers and shared primitives.
//!
//! This crate has no runtime or infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{CoreError, CoreResult};
pub use id::{IdGenerator, JobId, SequentialIdGenerator, ServerName, UuidV7Generator};
