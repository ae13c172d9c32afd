//! Vocabulary shared by the relay core and the binary: which side of a session
//! an event belongs to, which way bytes are flowing, and why a session ended.

use serde::Deserialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Endpoints and directions
// ---------------------------------------------------------------------------

/// One of the two endpoints owned by a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The accepted inbound connection.
    Client,
    /// The outbound connection to the configured target.
    Upstream,
}

impl Side {
    /// The direction of bytes read from this side.
    pub fn outbound(self) -> Direction {
        match self {
            Side::Client => Direction::ClientToUpstream,
            Side::Upstream => Direction::UpstreamToClient,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        })
    }
}

/// Direction of a relayed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    /// Three-character marker written in front of every dump record.
    pub fn marker(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "-->",
            Direction::UpstreamToClient => "<--",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ClientToUpstream => "client->upstream",
            Direction::UpstreamToClient => "upstream->client",
        })
    }
}

// ---------------------------------------------------------------------------
// Dump rendering
// ---------------------------------------------------------------------------

/// How a chunk of raw bytes is rendered into the session dump file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Byte-string literal, e.g. `b"GET / HTTP/1.1\r\n"`.
    #[default]
    Escaped,
    /// Lowercase hex pairs, e.g. `474554`.
    Hex,
}

impl DumpFormat {
    /// Configuration spelling of this format.
    pub fn as_str(self) -> &'static str {
        match self {
            DumpFormat::Escaped => "escaped",
            DumpFormat::Hex => "hex",
        }
    }
}

impl std::str::FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "escaped" => Ok(DumpFormat::Escaped),
            "hex" => Ok(DumpFormat::Hex),
            other => Err(format!("unknown dump format {other:?} (expected \"escaped\" or \"hex\")")),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal states
// ---------------------------------------------------------------------------

/// Why a relay session stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Orderly zero-length read from the given side.
    PeerClosed(Side),
    /// The given side reset or aborted the connection.
    ConnectionReset(Side),
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::PeerClosed(side) => write!(f, "{side} closed"),
            SessionEnd::ConnectionReset(side) => write!(f, "{side} reset"),
            SessionEnd::Shutdown => f.write_str("shutdown"),
        }
    }
}
