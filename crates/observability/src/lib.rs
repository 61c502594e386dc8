//! Tracing and logging setup shared by every binary embedding the core.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, ParseLogFormatError};

/// Initialize process-wide tracing with the default level and JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init("info", LogFormat::Json);
}

/// Initialize process-wide tracing with an explicit fallback level and format.
///
/// `RUST_LOG` still wins over `level` when it is set.
pub fn init_with(level: &str, format: LogFormat) {
    self::tracing::init(level, format);
}
