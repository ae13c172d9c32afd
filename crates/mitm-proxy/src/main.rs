//! `mitm-proxy` — logging TCP relay binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables and flags.
//! 2. Initialise structured JSON logging.
//! 3. Install the Ctrl-C handler that shuts every session down.
//! 4. Start the TCP accept loop, relaying each connection to the upstream
//!    and dumping its traffic to a per-connection file.

mod config;
mod proxy;
mod session;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{Cli, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::load(Cli::parse()).map_err(|e| {
        eprintln!("ERROR: mitm-proxy configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "mitm-proxy starting");

    // -----------------------------------------------------------------------
    // 3. Shutdown
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C; shutdown only by kill"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 4. Proxy
    // -----------------------------------------------------------------------
    proxy::run(&cfg, shutdown).await
}
