use std::io;

use depot_types::{BlobId, TypeError};

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A blob id or backing path is already taken. Creates never overwrite.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The requested path or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Content read back does not match the size/hash recorded at creation.
    #[error("corrupt blob {id}: {reason}")]
    CorruptBlob { id: BlobId, reason: String },

    /// A live record exists but its backing bytes are gone.
    #[error("blob {0} has a live record but no backing content")]
    MissingContent(BlobId),

    /// A header required on create was not supplied.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The per-blob lock could not be acquired in time.
    #[error("timed out waiting for lock on blob {0}")]
    LockTimeout(BlobId),

    /// Serialization or deserialization failure in the metadata log.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A supplied blob id failed validation.
    #[error(transparent)]
    InvalidId(#[from] TypeError),

    /// The store has not been started, or has been stopped.
    #[error("blob store is not started")]
    Stopped,
}

impl StoreError {
    /// Returns `true` for integrity failures, as opposed to missing data or I/O.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptBlob { .. })
    }
}

impl From<io::Error> for StoreError {
    /// Unwraps store errors that were tunnelled through an `io::Error` by a
    /// `Read` implementation; everything else becomes [`StoreError::Io`].
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<StoreError>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<StoreError>()) {
            Some(Ok(store_err)) => *store_err,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(io::Error::from(kind)),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_io_errors_stay_io() {
        let err: StoreError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
    }

    #[test]
    fn tunnelled_corruption_is_unwrapped() {
        let inner = StoreError::CorruptBlob {
            id: BlobId::new("x").unwrap(),
            reason: "size mismatch".into(),
        };
        let io_err = io::Error::new(io::ErrorKind::InvalidData, inner);
        let err: StoreError = io_err.into();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("size mismatch"));
    }
}
