//! [`DirectionalBuffer`]: bytes read from one endpoint that the other endpoint
//! has not accepted yet.

use bytes::{Buf, BytesMut};
use std::io;

/// FIFO of pending bytes for one direction of a session.
///
/// Bytes enter at the tail in receive order and leave from the head in send
/// order. There is no cap; growth is bounded by how much one read returns
/// between drain attempts.
#[derive(Debug, Default)]
pub struct DirectionalBuffer {
    pending: BytesMut,
}

impl DirectionalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk at the tail.
    pub fn append(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Push pending bytes through `write` until it would block or the buffer
    /// is empty, returning how many bytes are still pending.
    ///
    /// `write` is a non-blocking send primitive such as
    /// [`tokio::net::TcpStream::try_write`]. Each successful call removes
    /// exactly the number of bytes it reports from the head; `WouldBlock`
    /// stops the drain without error and `Interrupted` retries immediately.
    ///
    /// # Errors
    ///
    /// Any other error from `write` is returned unchanged with the buffer
    /// left intact. A zero-length write on a non-empty buffer is reported as
    /// [`io::ErrorKind::WriteZero`].
    pub fn drain<F>(&mut self, mut write: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        while !self.pending.is_empty() {
            match write(&self.pending[..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.pending.advance(n.min(self.pending.len())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that accepts at most `per_call` bytes per write and reports
    /// `WouldBlock` once `budget` calls have been made.
    struct Throttled {
        received: Vec<u8>,
        per_call: usize,
        budget: usize,
    }

    impl Throttled {
        fn new(per_call: usize, budget: usize) -> Self {
            Self {
                received: Vec::new(),
                per_call,
                budget,
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.budget -= 1;
            let n = buf.len().min(self.per_call);
            self.received.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn empty_buffer_never_calls_writer() {
        let mut buf = DirectionalBuffer::new();
        let remaining = buf
            .drain(|_| panic!("writer must not be called"))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn full_drain_empties_buffer() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        let mut sink = Throttled::new(usize::MAX, usize::MAX);
        assert_eq!(buf.drain(|b| sink.write(b)).unwrap(), 0);
        assert!(buf.is_empty());
        assert_eq!(sink.received, b"hello world");
    }

    #[test]
    fn partial_writes_keep_remainder_for_next_drain() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"abcdefghij");

        let mut sink = Throttled::new(3, 2);
        assert_eq!(buf.drain(|b| sink.write(b)).unwrap(), 4);
        assert_eq!(sink.received, b"abcdef");

        // New data queues behind the undelivered remainder.
        buf.append(b"XYZ");
        sink.budget = usize::MAX;
        assert_eq!(buf.drain(|b| sink.write(b)).unwrap(), 0);
        assert_eq!(sink.received, b"abcdefghijXYZ");
    }

    #[test]
    fn would_block_on_first_call_leaves_buffer_untouched() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"pending");
        let mut sink = Throttled::new(100, 0);
        assert_eq!(buf.drain(|b| sink.write(b)).unwrap(), 7);
        assert!(sink.received.is_empty());
    }

    #[test]
    fn interrupted_is_retried() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"data");
        let mut interrupted = false;
        let remaining = buf
            .drain(|b| {
                if !interrupted {
                    interrupted = true;
                    return Err(io::ErrorKind::Interrupted.into());
                }
                Ok(b.len())
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn hard_error_is_returned_and_bytes_kept() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"data");
        let err = buf
            .drain(|_| Err(io::ErrorKind::ConnectionReset.into()))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn zero_length_write_is_an_error() {
        let mut buf = DirectionalBuffer::new();
        buf.append(b"x");
        let err = buf.drain(|_| Ok(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
