//! Shared utilities for xrpilot: configuration files, logging, error types.
//!
//! This crate provides common infrastructure used across all xrpilot components.

#![forbid(unsafe_code)]

pub mod config_file;
pub mod error;

pub use config_file::{read_json_file, write_json_file};
pub use error::{Error, Result};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
///
/// Records emitted through the `log` facade (the OpenXR adapter uses it)
/// are forwarded into the same subscriber.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
