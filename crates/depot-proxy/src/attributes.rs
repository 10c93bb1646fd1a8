use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use depot_types::BlobId;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::backing::Context;
use crate::error::{ProxyError, ProxyResult};
use crate::info::{CacheInfo, ContentInfo};

const SUFFIX: &str = ".attributes.json";

/// Everything the proxy knows about one cached path besides its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAttributes {
    pub blob_id: BlobId,
    pub content_type: Option<String>,
    pub content_info: ContentInfo,
    pub cache_info: Option<CacheInfo>,
}

/// One JSON document per cached path under a root directory.
///
/// Documents are replaced atomically via temp file and rename, so a reader
/// sees either the old or the new document. A document that fails to parse is
/// logged, removed, and treated as absent.
#[derive(Clone, Debug)]
pub struct AttributeStorage {
    root: PathBuf,
}

impl AttributeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, ctx: &Context) -> PathBuf {
        self.root.join(format!("{}{SUFFIX}", ctx.path()))
    }

    pub fn read(&self, ctx: &Context) -> ProxyResult<Option<AssetAttributes>> {
        let path = self.path_for(ctx);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(attributes) => Ok(Some(attributes)),
            Err(e) => {
                warn!(path = %ctx.path(), error = %e, "attributes are corrupt; discarding");
                if let Err(remove) = fs::remove_file(&path) {
                    warn!(path = %ctx.path(), error = %remove, "failed to remove corrupt attributes");
                }
                Ok(None)
            }
        }
    }

    pub fn write(&self, ctx: &Context, attributes: &AssetAttributes) -> ProxyResult<()> {
        let path = self.path_for(ctx);
        let parent = path
            .parent()
            .ok_or_else(|| ProxyError::InvalidPath(ctx.path().to_string()))?;
        fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(attributes).map_err(|e| ProxyError::Attributes(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ProxyError::Io(e.error))?;

        debug!(path = %ctx.path(), blob_id = %attributes.blob_id, "attributes written");
        Ok(())
    }
}
