use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use depot_crypto::MetricsReader;
use depot_types::StreamMetrics;
use tracing::{trace, warn};

use crate::error::{StoreError, StoreResult};

/// Filesystem primitives the blob store is built on.
///
/// Kept behind a trait so tests can inject failures without touching the
/// real filesystem.
pub trait FileOperations: Send + Sync {
    /// Stream `data` into a new file at `path`, creating parent directories.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the path is taken. On any
    /// failure no partial file is left behind.
    fn create(&self, path: &Path, data: &mut dyn Read) -> StoreResult<StreamMetrics>;

    fn exists(&self, path: &Path) -> StoreResult<bool>;

    /// Open an existing file for reading. Missing files yield [`StoreError::NotFound`].
    fn open_read(&self, path: &Path) -> StoreResult<Box<dyn Read + Send>>;

    /// Remove a file. Returns `true` if it existed.
    ///
    /// Idempotent: deleting a missing file is not an error, but a path that
    /// still exists after the attempt is.
    fn delete(&self, path: &Path) -> StoreResult<bool>;
}

/// [`FileOperations`] over `std::fs`.
#[derive(Clone, Debug)]
pub struct SimpleFileOperations {
    sync: bool,
}

impl SimpleFileOperations {
    /// `sync` controls whether created files are fsynced before returning.
    pub fn new(sync: bool) -> Self {
        Self { sync }
    }

    fn write_content(&self, file: File, data: &mut dyn Read) -> StoreResult<StreamMetrics> {
        let mut input = MetricsReader::new(data);
        let mut writer = BufWriter::new(file);
        io::copy(&mut input, &mut writer)?;
        writer.flush()?;
        if self.sync {
            writer.get_ref().sync_all()?;
        }
        input
            .metrics()
            .map_err(|e| StoreError::Io(io::Error::other(e)))
    }
}

impl Default for SimpleFileOperations {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FileOperations for SimpleFileOperations {
    fn create(&self, path: &Path, data: &mut dyn Read) -> StoreResult<StreamMetrics> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        match self.write_content(file, data) {
            Ok(metrics) => {
                trace!(path = %path.display(), size = metrics.size, "file created");
                Ok(metrics)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove partial file");
                }
                Err(e)
            }
        }
    }

    fn exists(&self, path: &Path) -> StoreResult<bool> {
        Ok(path.try_exists()?)
    }

    fn open_read(&self, path: &Path) -> StoreResult<Box<dyn Read + Send>> {
        match File::open(path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, path: &Path) -> StoreResult<bool> {
        let deleted = match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if path.try_exists()? {
            return Err(StoreError::Io(io::Error::other(format!(
                "file was not deleted: {}",
                path.display()
            ))));
        }
        trace!(path = %path.display(), deleted, "file delete");
        Ok(deleted)
    }
}
