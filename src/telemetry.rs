//! Tracing subscriber setup for hosts embedding the orchestrator.
//!
//! The library itself only emits `tracing` events; nothing here runs unless the
//! host calls [`init_tracing`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber at `level`.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is a
/// no-op: the first installed subscriber wins.
pub fn init_tracing(level: &str) {
    let default_filter = format!("{level},agi_core={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .ok();
}

/// Install a global subscriber at `info`.
pub fn init_default_tracing() {
    init_tracing("info");
}
