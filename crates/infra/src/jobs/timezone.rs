//! Time-zone resolution for job contexts.

use std::collections::HashMap;

use chrono::{FixedOffset, Offset, Utc};

/// Resolves a time-zone id (as stored on a job) to a UTC offset.
pub trait TimeZoneResolver: Send + Sync {
    /// `None` when the id is unknown.
    fn resolve(&self, time_zone: &str) -> Option<FixedOffset>;
}

/// Knows only UTC (`"UTC"`, `"Etc/UTC"`, `"Z"`, case-insensitive).
#[derive(Debug, Default, Clone, Copy)]
pub struct UtcResolver;

fn utc() -> FixedOffset {
    Utc.fix()
}

impl TimeZoneResolver for UtcResolver {
    fn resolve(&self, time_zone: &str) -> Option<FixedOffset> {
        let tz = time_zone.trim();
        ["utc", "etc/utc", "z"]
            .iter()
            .any(|known| tz.eq_ignore_ascii_case(known))
            .then(utc)
    }
}

/// Table of named fixed offsets, plus literal `+HH:MM` / `-HH:MM` ids.
#[derive(Debug, Default, Clone)]
pub struct FixedOffsetResolver {
    zones: HashMap<String, FixedOffset>,
}

impl FixedOffsetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` at `offset_seconds` east of UTC. Out-of-range offsets
    /// are ignored.
    pub fn with_zone(mut self, name: impl Into<String>, offset_seconds: i32) -> Self {
        if let Some(offset) = FixedOffset::east_opt(offset_seconds) {
            self.zones.insert(name.into(), offset);
        }
        self
    }
}

impl TimeZoneResolver for FixedOffsetResolver {
    fn resolve(&self, time_zone: &str) -> Option<FixedOffset> {
        let tz = time_zone.trim();
        self.zones
            .get(tz)
            .copied()
            .or_else(|| tz.parse::<FixedOffset>().ok())
            .or_else(|| UtcResolver.resolve(tz))
    }
}
