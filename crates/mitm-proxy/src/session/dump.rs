//! Per-session traffic dump.
//!
//! Each relayed chunk becomes one record: a line break, the direction marker
//! (`-->` or `<--`) and the rendered bytes. Records are written and flushed
//! in call order, so the file is a single interleaved timeline of both
//! directions.

use std::fmt::Write as _;
use std::path::PathBuf;

use common::{Direction, DumpFormat, SessionError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Append-only writer for one session's dump file.
#[derive(Debug)]
pub struct Dump<W> {
    sink: W,
    path: PathBuf,
    format: DumpFormat,
}

impl<W: AsyncWrite + Unpin> Dump<W> {
    /// Wrap an already-open sink. `path` is only used in error reports.
    pub fn new(sink: W, path: impl Into<PathBuf>, format: DumpFormat) -> Self {
        Self {
            sink,
            path: path.into(),
            format,
        }
    }

    /// Append one record and flush it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LogSink`] if the sink rejects the write.
    pub async fn record(&mut self, direction: Direction, chunk: &[u8]) -> Result<(), SessionError> {
        let entry = entry(direction, chunk, self.format);
        self.sink
            .write_all(entry.as_bytes())
            .await
            .map_err(|source| self.sink_error(source))?;
        self.sink.flush().await.map_err(|source| self.sink_error(source))
    }

    /// Flush and close the sink.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.sink
            .shutdown()
            .await
            .map_err(|source| self.sink_error(source))
    }

    fn sink_error(&self, source: std::io::Error) -> SessionError {
        SessionError::LogSink {
            path: self.path.clone(),
            source,
        }
    }
}

/// Format one dump record.
pub fn entry(direction: Direction, chunk: &[u8], format: DumpFormat) -> String {
    let mut out = String::with_capacity(chunk.len() * 2 + 8);
    out.push('\n');
    out.push_str(direction.marker());
    match format {
        DumpFormat::Escaped => {
            out.push_str("b\"");
            out.extend(chunk.iter().flat_map(|&b| std::ascii::escape_default(b)).map(char::from));
            out.push('"');
        }
        DumpFormat::Hex => {
            for b in chunk {
                // Writing to a String cannot fail.
                let _ = write!(out, "{b:02x}");
            }
        }
    }
    out
}
