//! Shared helpers for the `rcscript` integration tests.
//!
//! Declared with `mod common;` in each test file that needs it.

use rcscript::{HostConfig, ScriptHost};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rcscript=debug")),
            )
            .try_init();
    });
}

/// An isolated host with a small worker pool.
pub fn test_host() -> ScriptHost {
    init_tracing();
    ScriptHost::from_config(HostConfig {
        worker_threads: 4,
        ..HostConfig::default()
    })
}
