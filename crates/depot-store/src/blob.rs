use std::fmt;
use std::io::{self, Read};

use depot_crypto::MetricsReader;
use depot_types::{BlobId, BlobRecord, Headers, StreamMetrics};

use crate::error::{StoreError, StoreResult};
use crate::locks::SharedGuard;

/// An open blob: its record plus a readable stream of its content.
///
/// The handle holds a shared lock on the blob for its whole lifetime, so the
/// blob cannot be deleted or compacted away while it is being read. Drop the
/// handle promptly; writers on the same id wait for it.
pub struct Blob {
    record: BlobRecord,
    content: Box<dyn Read + Send>,
    _guard: SharedGuard,
}

impl Blob {
    pub(crate) fn new(record: BlobRecord, content: Box<dyn Read + Send>, guard: SharedGuard) -> Self {
        Self {
            record,
            content,
            _guard: guard,
        }
    }

    pub fn id(&self) -> &BlobId {
        &self.record.blob_id
    }

    pub fn size(&self) -> u64 {
        self.record.content_size
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.record.metrics()
    }

    pub fn headers(&self) -> &Headers {
        &self.record.headers
    }

    pub fn record(&self) -> &BlobRecord {
        &self.record
    }

    /// Wrap the content stream so that reaching end-of-stream checks the
    /// bytes against the recorded size and SHA-1.
    pub fn verified_reader(self) -> VerifyingReader {
        let expected = self.record.metrics();
        let id = self.record.blob_id.clone();
        VerifyingReader {
            inner: MetricsReader::new(self),
            expected,
            id,
        }
    }

    /// Read the whole blob into memory, verifying size and SHA-1.
    pub fn read_verified(self) -> StoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.size()).unwrap_or(0));
        self.verified_reader().read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for Blob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.record.blob_id)
            .field("size", &self.record.content_size)
            .field("sha1", &self.record.sha1)
            .finish_non_exhaustive()
    }
}

/// Reader over a [`Blob`] that fails with [`StoreError::CorruptBlob`] (wrapped
/// in an `InvalidData` I/O error) when the content does not match its record.
pub struct VerifyingReader {
    inner: MetricsReader<Blob>,
    expected: StreamMetrics,
    id: BlobId,
}

impl VerifyingReader {
    fn corrupt(&self, reason: String) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            StoreError::CorruptBlob {
                id: self.id.clone(),
                reason,
            },
        )
    }
}

impl Read for VerifyingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if self.inner.bytes_read() > self.expected.size {
            return Err(self.corrupt(format!(
                "content exceeds recorded size of {} bytes",
                self.expected.size
            )));
        }
        if n == 0 && self.inner.is_exhausted() {
            let actual = self.inner.metrics().map_err(io::Error::other)?;
            if actual.size != self.expected.size {
                return Err(self.corrupt(format!(
                    "size mismatch: recorded {}, read {}",
                    self.expected.size, actual.size
                )));
            }
            if actual.sha1 != self.expected.sha1 {
                return Err(self.corrupt(format!(
                    "sha1 mismatch: recorded {}, read {}",
                    self.expected.sha1, actual.sha1
                )));
            }
        }
        Ok(n)
    }
}
