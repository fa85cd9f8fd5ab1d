//! Strongly-typed identifiers and the id-generation capability.

use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Source of fresh unique identifiers.
///
/// Injected wherever a new identity is minted so tests can substitute a
/// deterministic sequence.
pub trait IdGenerator: Send + Sync {
    fn next_uuid(&self) -> Uuid;
}

/// Default generator: time-ordered UUIDv7.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_uuid(&self) -> Uuid {
        Uuid::now_v7()
    }
}

/// Deterministic generator yielding `1, 2, 3, ...` encoded as UUIDs.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_uuid(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(n as u128)
    }
}

/// Identifier of a background job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer [`JobId::generate`] with an injected
    /// generator where determinism matters.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn generate(ids: &dyn IdGenerator) -> Self {
        Self(ids.next_uuid())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| CoreError::invalid_id(format!("JobId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Identity of a background job server instance.
///
/// Disambiguates log lines and storage leases between servers that share a
/// job store. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerName(String);

impl ServerName {
    pub const PREFIX: &'static str = "bus-scheduler";

    /// Mint a fresh name of the form `bus-scheduler-<32 hex digits>`.
    pub fn generate(ids: &dyn IdGenerator) -> Self {
        Self(format!("{}-{}", Self::PREFIX, ids.next_uuid().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for ServerName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_server_name("empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::invalid_server_name(format!(
                "'{trimmed}' contains whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_generator_is_deterministic() {
        let ids = SequentialIdGenerator::new();
        assert_eq!(ids.next_uuid(), Uuid::from_u128(1));
        assert_eq!(ids.next_uuid(), Uuid::from_u128(2));

        let again = SequentialIdGenerator::new();
        assert_eq!(JobId::generate(&again), JobId::from_uuid(Uuid::from_u128(1)));
    }

    #[test]
    fn server_name_uses_prefix_and_simple_uuid() {
        let ids = SequentialIdGenerator::starting_at(255);
        let name = ServerName::generate(&ids);
        assert_eq!(
            name.as_str(),
            "bus-scheduler-000000000000000000000000000000ff"
        );
    }

    #[test]
    fn generated_server_names_are_unique() {
        let ids = UuidV7Generator;
        let a = ServerName::generate(&ids);
        let b = ServerName::generate(&ids);
        assert_ne!(a, b);
    }

    #[test]
    fn server_name_parse_rejects_blank_and_whitespace() {
        assert!("".parse::<ServerName>().is_err());
        assert!("   ".parse::<ServerName>().is_err());
        assert!("two words".parse::<ServerName>().is_err());
        assert_eq!(
            " worker-1 ".parse::<ServerName>().unwrap().as_str(),
            "worker-1"
        );
    }

    #[test]
    fn job_id_parses_and_round_trips_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(matches!(
            "not-a-uuid".parse::<JobId>(),
            Err(CoreError::InvalidId(_))
        ));
    }

    #[test]
    fn job_id_serializes_transparently() {
        let id = JobId::from_uuid(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000007\"");
    }
}
