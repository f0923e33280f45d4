//! Replay-aware logging for orchestrator code, plus subscriber setup.
//!
//! Orchestrations re-run from the top on every pass, so a plain `tracing`
//! call inside one would repeat for every completion. The `durable_*` macros
//! only emit once the pass has moved past recorded history.

use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! durable_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::info!(target: "durable_tasks::orchestration", $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! durable_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::warn!(target: "durable_tasks::orchestration", $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! durable_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::error!(target: "durable_tasks::orchestration", $($arg)+);
        }
    }};
}

/// Install a global fmt subscriber. `RUST_LOG` wins over `default_level`.
/// A second call (or a subscriber installed by the host) is left alone.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
