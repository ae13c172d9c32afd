//! The relay loop.
//!
//! A [`Session`] services both directions from a single task. Each cycle
//! waits until at least one endpoint is ready, then:
//! 1. reads from the client (logs `-->`, queues for upstream),
//! 2. reads from upstream (logs `<--`, queues for the client),
//! 3. drains the to-upstream buffer,
//! 4. drains the to-client buffer.
//!
//! Every socket call inside a cycle is non-blocking (`try_read` /
//! `try_write`), so a silent direction never stalls the other one, and the
//! dump sees the client read before the upstream read within a cycle.

use std::io;

use common::{Direction, IoCondition, SessionEnd, SessionError, Side};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::buffer::DirectionalBuffer;
use super::dump::Dump;

/// Bytes and chunks relayed in each direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream_bytes: u64,
    pub client_to_upstream_chunks: u64,
    pub upstream_to_client_bytes: u64,
    pub upstream_to_client_chunks: u64,
}

impl RelayStats {
    fn count(&mut self, direction: Direction, len: usize) {
        let (bytes, chunks) = match direction {
            Direction::ClientToUpstream => (
                &mut self.client_to_upstream_bytes,
                &mut self.client_to_upstream_chunks,
            ),
            Direction::UpstreamToClient => (
                &mut self.upstream_to_client_bytes,
                &mut self.upstream_to_client_chunks,
            ),
        };
        *bytes += len as u64;
        *chunks += 1;
    }
}

/// Outcome of a session that ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub stats: RelayStats,
}

/// One proxied connection pair and its dump.
///
/// Owns both sockets and the dump sink; all three are released when
/// [`Session::run`] returns, whatever the reason.
#[derive(Debug)]
pub struct Session<W> {
    client: TcpStream,
    upstream: TcpStream,
    to_upstream: DirectionalBuffer,
    to_client: DirectionalBuffer,
    dump: Dump<W>,
    chunk_size: usize,
    shutdown: CancellationToken,
    stats: RelayStats,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(
        client: TcpStream,
        upstream: TcpStream,
        dump: Dump<W>,
        chunk_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            upstream,
            to_upstream: DirectionalBuffer::new(),
            to_client: DirectionalBuffer::new(),
            dump,
            chunk_size: chunk_size.max(1),
            shutdown,
            stats: RelayStats::default(),
        }
    }

    /// Relay until a terminal condition, then close both sockets and the dump.
    ///
    /// Peer closes, resets and shutdown are reported through
    /// [`SessionSummary::end`]. Bytes still buffered at that point are
    /// discarded.
    ///
    /// # Errors
    ///
    /// [`SessionError::LogSink`] if the dump cannot be written or closed,
    /// [`SessionError::Io`] for any other unrecoverable socket error.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        let outcome = self.relay().await;

        let Session {
            client,
            upstream,
            to_upstream,
            to_client,
            dump,
            stats,
            ..
        } = self;
        drop(client);
        drop(upstream);
        let discarded = to_upstream.len() + to_client.len();
        if discarded > 0 {
            debug!(discarded, "dropping undelivered bytes");
        }
        let closed = dump.close().await;

        let end = outcome?;
        closed?;
        Ok(SessionSummary { end, stats })
    }

    async fn relay(&mut self) -> Result<SessionEnd, SessionError> {
        let mut scratch = vec![0u8; self.chunk_size];
        loop {
            let ready = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                r = self.client.readable() => r.map_err(|e| (Side::Client, e)),
                r = self.upstream.readable() => r.map_err(|e| (Side::Upstream, e)),
                r = self.upstream.writable(), if !self.to_upstream.is_empty() => {
                    r.map_err(|e| (Side::Upstream, e))
                }
                r = self.client.writable(), if !self.to_client.is_empty() => {
                    r.map_err(|e| (Side::Client, e))
                }
            };
            if let Err((side, err)) = ready {
                if let Some(end) = terminal(side, err)? {
                    return Ok(end);
                }
            }

            if let Some(end) = self.cycle(&mut scratch).await? {
                return Ok(end);
            }
        }
    }

    /// One read/read/drain/drain pass. `Some` means the session is over.
    async fn cycle(&mut self, scratch: &mut [u8]) -> Result<Option<SessionEnd>, SessionError> {
        for side in [Side::Client, Side::Upstream] {
            if let Some(end) = self.read_from(side, scratch).await? {
                return Ok(Some(end));
            }
        }
        for side in [Side::Upstream, Side::Client] {
            if let Some(end) = self.drain_to(side)? {
                return Ok(Some(end));
            }
        }
        Ok(None)
    }

    async fn read_from(
        &mut self,
        side: Side,
        scratch: &mut [u8],
    ) -> Result<Option<SessionEnd>, SessionError> {
        let stream = match side {
            Side::Client => &self.client,
            Side::Upstream => &self.upstream,
        };
        match stream.try_read(scratch) {
            Ok(0) => Ok(Some(SessionEnd::PeerClosed(side))),
            Ok(n) => {
                let chunk = &scratch[..n];
                let direction = side.outbound();
                self.dump.record(direction, chunk).await?;
                self.stats.count(direction, n);
                match direction {
                    Direction::ClientToUpstream => self.to_upstream.append(chunk),
                    Direction::UpstreamToClient => self.to_client.append(chunk),
                }
                Ok(None)
            }
            Err(err) => terminal(side, err),
        }
    }

    fn drain_to(&mut self, side: Side) -> Result<Option<SessionEnd>, SessionError> {
        let (buffer, stream) = match side {
            Side::Upstream => (&mut self.to_upstream, &self.upstream),
            Side::Client => (&mut self.to_client, &self.client),
        };
        match buffer.drain(|bytes| stream.try_write(bytes)) {
            Ok(_) => Ok(None),
            Err(err) => terminal(side, err),
        }
    }
}

/// Map a socket error to "keep going", "session over" or a hard failure.
fn terminal(side: Side, err: io::Error) -> Result<Option<SessionEnd>, SessionError> {
    match IoCondition::classify(&err) {
        IoCondition::Transient => Ok(None),
        IoCondition::Reset => {
            debug!(%side, error = %err, "connection reset");
            Ok(Some(SessionEnd::ConnectionReset(side)))
        }
        IoCondition::Fatal => Err(SessionError::Io { side, source: err }),
    }
}
