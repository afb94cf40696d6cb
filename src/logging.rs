use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `level` takes an `EnvFilter` directive (`info`, `host_scan_rs=debug`, ...).
/// When `None`, `RUST_LOG` is used, falling back to `warn`.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log level: {directive}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install tracing subscriber")
}
