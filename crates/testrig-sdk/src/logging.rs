//! Tracing subscriber setup.
//!
//! The filter comes from `RUST_LOG` and falls back to [`DEFAULT_FILTER`].
//! Installing a subscriber twice is harmless: the second call reports
//! `false` and leaves the first one in place.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn,testrig=info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Returns whether this call installed it.
pub fn init(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(filter());
    match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Installs a subscriber whose output is captured by the test harness.
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_installation_is_refused() {
        let _ = init_for_tests();
        assert!(!init(LogFormat::Text));
        assert!(!init_for_tests());
    }
}
