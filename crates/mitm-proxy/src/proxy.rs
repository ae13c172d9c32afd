//! Listener and per-connection dispatch.
//!
//! For each incoming TCP connection the proxy:
//! 1. Opens a new connection to the configured upstream.
//! 2. Creates the session's dump file.
//! 3. Spawns one Tokio task that relays and logs both directions until
//!    either side closes.
//!
//! Bytes are forwarded opaquely; nothing is parsed or modified. A failing
//! session is logged and never affects the listener or other sessions.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::session::SessionFactory;

/// Bind the configured listener and serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the configuration has no usable target or the TCP
/// listener cannot be bound.
pub async fn run(cfg: &Config, shutdown: CancellationToken) -> Result<()> {
    let factory = SessionFactory::new(cfg.relay_config()?, shutdown.clone());
    let listener = TcpListener::bind((cfg.listen_addr.as_str(), cfg.listen_port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cfg.listen_addr, cfg.listen_port))?;
    let addr = listener.local_addr()?;
    info!(
        addr = %addr,
        upstream = %factory.config().target(),
        filename_template = %factory.config().filename_template,
        "mitm-proxy listening"
    );

    serve(listener, factory, shutdown).await;
    Ok(())
}

/// Accept loop. Returns once `shutdown` is cancelled and every live session
/// has closed its sockets and dump file.
pub async fn serve(listener: TcpListener, factory: SessionFactory, shutdown: CancellationToken) {
    let sessions = TaskTracker::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    sessions.spawn(handle_connection(factory.clone(), stream, peer_addr));
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            },
        }
    }

    sessions.close();
    info!(live_sessions = sessions.len(), "shutting down; waiting for sessions");
    sessions.wait().await;
}

/// Run one session from accept to teardown.
async fn handle_connection(factory: SessionFactory, stream: TcpStream, peer_addr: SocketAddr) {
    let span = info_span!("session", id = %Uuid::new_v4(), %peer_addr);
    async move {
        debug!("accepted TCP connection");
        let session = match factory.create(stream).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session setup failed");
                return;
            }
        };

        match session.run().await {
            Ok(summary) => info!(
                end = %summary.end,
                client_to_upstream_bytes = summary.stats.client_to_upstream_bytes,
                client_to_upstream_chunks = summary.stats.client_to_upstream_chunks,
                upstream_to_client_bytes = summary.stats.upstream_to_client_bytes,
                upstream_to_client_chunks = summary.stats.upstream_to_client_chunks,
                "session finished"
            ),
            Err(e) => warn!(error = %e, "session failed"),
        }
    }
    .instrument(span)
    .await
}
