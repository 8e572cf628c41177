//! Tracing/logging bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hermod_client=debug,hermod_core=debug";

/// Initialize global tracing subscriber with severity gating from environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `HERMOD_SMOKE_LOG`
/// 3) `HERMOD_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(filter) = filter_from_var("HERMOD_SMOKE_LOG") {
        return filter;
    }
    if let Some(filter) = filter_from_var("HERMOD_LOG") {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}

fn filter_from_var(name: &str) -> Option<EnvFilter> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
}
