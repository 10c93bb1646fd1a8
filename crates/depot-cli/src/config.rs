use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use depot_proxy::ProxyConfig;
use depot_store::StoreConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "depot.toml";

/// Contents of `depot.toml`. Every section may be omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Directory holding blobs, metadata, and proxy attributes.
    pub root: PathBuf,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub store: StoreConfig,
    pub proxy: Option<ProxyConfig>,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("depot-data"),
            log_level: "info".into(),
            store: StoreConfig::default(),
            proxy: None,
        }
    }
}

impl DepotConfig {
    /// Load `path`, or `./depot.toml` if no path is given and it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn attributes_dir(&self) -> PathBuf {
        self.root.join("proxy").join("attributes")
    }

    pub fn token_file(&self) -> PathBuf {
        self.root.join("proxy").join("cache.token")
    }
}
