//! Unified logging initialization for the unitledger binary.
//!
//! Respects the following priority order:
//! 1. CLI flags (`-v/-q`) - highest priority
//! 2. `RUST_LOG` environment variable
//! 3. Binary-specific default - lowest priority

use anyhow::Result;
use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `base_filter` scopes the `-v`/`-q` flags to a target (e.g. `unitledger`);
/// `default_filter` is used when neither the flags nor `RUST_LOG` are set.
pub fn init_logging<L: LogLevel>(
    verbosity: &Verbosity<L>,
    base_filter: &str,
    default_filter: &str,
) -> Result<()> {
    let filter = if verbosity.is_present() {
        EnvFilter::try_new(format!("{base_filter}={}", verbosity.log_level_filter()))?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).compact())
        .init();

    Ok(())
}
