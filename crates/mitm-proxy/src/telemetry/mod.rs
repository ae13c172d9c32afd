//! Telemetry initialisation for the relay.
//!
//! Operational events only: structured JSON logs on stdout. Relayed bytes
//! never go here; they are written to the per-session dump files.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. Each event carries the
/// fields of its enclosing `session` span (session id and peer address).
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|e| anyhow::anyhow!("invalid log level {log_level:?}: {e}"))?,
    };

    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise mitm-proxy tracing subscriber: {e}"))
}
