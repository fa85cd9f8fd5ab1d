//! Process-wide tracing setup shared by the binaries.

/// Initialize process-wide tracing with the `info` default.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
