//! Process-wide tracing setup for device and authority processes.
//!
//! Access points run headless; logs are emitted as JSON lines so a fleet
//! collector can ship them without parsing heuristics. The filter comes from
//! `RUST_LOG`, falling back to `info`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with the `RUST_LOG` filter.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    init_with_default_filter("info");
}

/// Like [`init`] but with an explicit fallback filter directive for when
/// `RUST_LOG` is unset. Useful for tests and embedded tooling.
pub fn init_with_default_filter(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
