//! Bounded reader over one chunk's byte range.

use std::io::{self, Read};

use tracing::trace;

const DRAIN_BUFFER: usize = 16 * 1024;

/// Wraps a stream positioned at a chunk's offset and exposes at most the
/// chunk's length. Reads and skips are clamped to the upper bound; closing or
/// dropping the reader drains and discards the unread remainder.
pub struct ChunkReader {
    inner: Option<Box<dyn Read + Send>>,
    remaining: u64,
}

impl ChunkReader {
    /// Bounds `inner` to `length` bytes.
    pub fn new(inner: Box<dyn Read + Send>, length: u64) -> Self {
        Self {
            inner: Some(inner),
            remaining: length,
        }
    }

    /// Bytes left before the upper bound.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Skips up to `n` bytes, never past the upper bound. Returns bytes skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let want = n.min(self.remaining);
        let skipped = io::copy(&mut inner.take(want), &mut io::sink())?;
        self.remaining -= skipped;
        Ok(skipped)
    }

    /// Drains the rest of the chunk and releases the stream. Never fails:
    /// drain errors are discarded.
    pub fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            let mut buf = [0u8; DRAIN_BUFFER];
            while self.remaining > 0 {
                let want = self.remaining.min(DRAIN_BUFFER as u64) as usize;
                match inner.read(&mut buf[..want]) {
                    Ok(0) => break,
                    Ok(n) => self.remaining -= n as u64,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        trace!(error = %e, "discarding chunk drain error");
                        break;
                    }
                }
            }
            self.remaining = 0;
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = self.remaining.min(buf.len() as u64) as usize;
        let n = inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("remaining", &self.remaining)
            .field("closed", &self.inner.is_none())
            .finish()
    }
}
