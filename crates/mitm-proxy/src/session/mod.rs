//! Session assembly: upstream connect, dump file creation, and the relay
//! loop that ties them together.
//!
//! A [`SessionFactory`] turns an accepted client socket into a ready-to-run
//! [`Session`]. Either setup step can fail; in both cases everything already
//! acquired (the client socket, and the upstream socket if it was opened) is
//! dropped before the error is returned, and no session is started.

pub mod buffer;
pub mod dump;
pub mod relay;
pub mod template;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use common::{DumpFormat, SessionError};
use tokio::fs::{File, OpenOptions};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use dump::Dump;
pub use relay::Session;

/// Immutable per-session settings, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upstream host name or address.
    pub target_addr: String,
    /// Upstream port.
    pub target_port: u16,
    /// Dump path template, see [`template::render`].
    pub filename_template: String,
    /// Rendering used for dump records.
    pub dump_format: DumpFormat,
    /// Largest chunk read from a socket in one call.
    pub chunk_size: usize,
    /// Upper bound on the upstream connect; `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
}

impl RelayConfig {
    /// `addr:port` form of the upstream, for diagnostics.
    pub fn target(&self) -> String {
        if self.target_addr.contains(':') {
            format!("[{}]:{}", self.target_addr, self.target_port)
        } else {
            format!("{}:{}", self.target_addr, self.target_port)
        }
    }
}

/// Builds sessions for accepted client connections.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    config: Arc<RelayConfig>,
    shutdown: CancellationToken,
}

impl SessionFactory {
    /// `shutdown` is handed to every session so the server can end them all.
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            shutdown,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Connect upstream and open the dump file for a new session started now.
    ///
    /// # Errors
    ///
    /// [`SessionError::UpstreamUnreachable`] if the target cannot be reached
    /// (no dump file is created), [`SessionError::LogSink`] if the dump file
    /// cannot be created or already exists. The client socket is closed in
    /// both cases.
    pub async fn create(&self, client: TcpStream) -> Result<Session<File>, SessionError> {
        self.create_at(client, Local::now().naive_local()).await
    }

    /// As [`SessionFactory::create`], with an explicit session start time.
    pub async fn create_at(
        &self,
        client: TcpStream,
        started: NaiveDateTime,
    ) -> Result<Session<File>, SessionError> {
        let upstream = self
            .connect_upstream()
            .await
            .map_err(|source| SessionError::UpstreamUnreachable {
                target: self.config.target(),
                source,
            })?;
        debug!(upstream = %self.config.target(), "upstream connection established");

        client.set_nodelay(true).ok();
        upstream.set_nodelay(true).ok();

        let path = template::render(&self.config.filename_template, started);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| SessionError::LogSink {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "logging to");

        let dump = Dump::new(file, path, self.config.dump_format);
        Ok(Session::new(
            client,
            upstream,
            dump,
            self.config.chunk_size,
            self.shutdown.clone(),
        ))
    }

    async fn connect_upstream(&self) -> io::Result<TcpStream> {
        let connect = TcpStream::connect((self.config.target_addr.as_str(), self.config.target_port));
        match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {limit:?}"),
                )
            })?,
            None => connect.await,
        }
    }
}
