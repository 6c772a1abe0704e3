use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the process-wide tracing subscriber: env-filter (`RUST_LOG`,
/// default `info`) plus a human-readable fmt layer, matching the teacher's
/// logging setup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
