//! Common error types shared across crates.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::relay::Side;

/// A failure that ends (or prevents) a relay session.
///
/// Orderly closes and resets are not errors; they are reported as
/// [`SessionEnd`](crate::SessionEnd) values instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The upstream target could not be reached (refused, unresolvable, or timed out).
    #[error("upstream {target} unreachable: {source}")]
    UpstreamUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The dump file could not be created or written.
    #[error("log sink {path:?} failed: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An unrecoverable socket error on one side of the session.
    #[error("{side} i/o error: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },
}

/// How the relay loop treats an [`io::Error`] returned by a socket call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCondition {
    /// Nothing ready right now; retry on the next cycle.
    Transient,
    /// The peer dropped the connection abruptly; ends the session quietly.
    Reset,
    /// Anything else; ends the session with an error.
    Fatal,
}

impl IoCondition {
    /// Classify a socket error.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => IoCondition::Transient,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => IoCondition::Reset,
            _ => IoCondition::Fatal,
        }
    }
}
