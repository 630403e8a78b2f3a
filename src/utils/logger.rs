//! Logging utilities
//!
//! Application-wide logging configuration built on env_logger. Diagnostic
//! lines go to stderr so the test child's mirrored output on stdout stays
//! machine-parseable.

use anyhow::Result;
use log::LevelFilter;

/// Sets up the global logger.
///
/// Verbose mode lowers the filter to debug. The `RUST_LOG` environment
/// variable still takes precedence, matching the usual env_logger contract.
pub fn setup_logger(verbose: bool) -> Result<()> {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(default_level)
        .format_timestamp_secs()
        .format_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}
