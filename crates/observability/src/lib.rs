//! Process-wide tracing setup shared by binaries and tests.

/// Tracing configuration (filters, formatter).
pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init_with_filter};

/// Initialize process-wide tracing with JSON output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}
