use std::io::{self, Read};

use depot_types::{Sha1Hash, StreamMetrics};
use sha1::{Digest, Sha1};

use crate::error::MetricsError;

/// Read decorator that counts bytes and updates a SHA-1 state on every read.
///
/// The wrapped stream is consumed exactly once; nothing is buffered beyond
/// the digest state. Metrics become available only after the inner reader
/// has reported end-of-stream (a zero-length read into a non-empty buffer).
pub struct MetricsReader<R> {
    inner: R,
    hasher: Sha1,
    size: u64,
    exhausted: bool,
}

impl<R: Read> MetricsReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            size: 0,
            exhausted: false,
        }
    }

    /// Bytes that have passed through so far.
    pub fn bytes_read(&self) -> u64 {
        self.size
    }

    /// Returns `true` once the inner reader has hit end-of-stream.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Final size and digest. Fails if the stream has not been fully consumed.
    pub fn metrics(&self) -> Result<StreamMetrics, MetricsError> {
        if !self.exhausted {
            return Err(MetricsError::NotExhausted {
                consumed: self.size,
            });
        }
        let digest: [u8; 20] = self.hasher.clone().finalize().into();
        Ok(StreamMetrics::new(self.size, Sha1Hash::from_bytes(digest)))
    }
}

impl<R: Read> Read for MetricsReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                self.exhausted = true;
            }
        } else {
            self.hasher.update(&buf[..n]);
            self.size += n as u64;
        }
        Ok(n)
    }
}
