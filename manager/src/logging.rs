//! Diagnostic logging for the manager.
//!
//! stderr is the verdict's diagnostic sink, so nothing is logged unless
//! `RUST_LOG` asks for it or protocol tracing is enabled. A `log_file` keeps
//! logs out of stderr entirely.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter applied when `RUST_LOG` is unset.
fn default_filter(trace: bool) -> &'static str {
    if trace { "pipe_manager::protocol=debug" } else { "off" }
}

/// Initialize the tracing subscriber.
///
/// Output: `log_file` (appended, no ANSI) if given, stderr otherwise;
/// compact format. A subscriber installed earlier (e.g. by a test) is kept.
///
/// # Example
/// ```bash
/// RUST_LOG=pipe_manager=debug pipe-manager echo /fifo/to /fifo/from
/// ```
pub fn init(log_file: Option<&Path>, trace: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(trace)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .compact(),
                )
                .try_init()
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
