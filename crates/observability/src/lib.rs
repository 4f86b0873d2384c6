//! Tracing and logging (shared setup).

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, LogSettings};

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings) {
    self::tracing::init(settings);
}
