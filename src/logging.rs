//! Logger initialization helper for host processes.

use anyhow::{Context, Result};
use log::LevelFilter;

/// Initializes an `env_logger`-backed global logger.
///
/// The `RUST_LOG` environment variable overrides `default_level`. Embedders
/// with their own logging setup can skip this entirely; the crate only uses
/// `log` macros internally.
pub fn init_logger(default_level: LevelFilter) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        default_level.to_string(),
    ))
    .try_init()
    .context("failed to initialize logger")
}
