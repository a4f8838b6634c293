//! Optimizer configuration parsing.

use crate::aggregator::{DEFAULT_AGGREGATION_KEY, DEFAULT_SYNC_PREFIX};
use crate::error::StoreError;
use crate::signature::DEFAULT_FRAME_SAMPLE;
use crate::store::{CacheStore, DirectoryStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to open cache store: {0}")]
    Store(#[from] StoreError),
}

/// Optimizer configuration matching the frugal.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Call-stack frames folded into a signature
    #[serde(default = "default_frame_sample")]
    pub frame_sample: usize,

    #[serde(default = "default_true")]
    pub track_resources: bool,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default = "default_sync_prefix")]
    pub sync_prefix: String,

    #[serde(default = "default_aggregation_key")]
    pub aggregation_key: String,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_frame_sample() -> usize {
    DEFAULT_FRAME_SAMPLE
}

fn default_sync_prefix() -> String {
    DEFAULT_SYNC_PREFIX.to_string()
}

fn default_aggregation_key() -> String {
    DEFAULT_AGGREGATION_KEY.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Directory,
}

/// Shared cache backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Directory for the `directory` backend
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            enabled: true,
            frame_sample: DEFAULT_FRAME_SAMPLE,
            track_resources: true,
            store: StoreConfig::default(),
            sync_prefix: default_sync_prefix(),
            aggregation_key: default_aggregation_key(),
            config_path: None,
        }
    }
}

impl OptimizerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;

        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Directory of the `directory` store, resolved relative to the config file
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store.path.as_ref().map(|p| self.resolve_path(p))
    }

    /// Build the configured shared cache backend
    pub fn build_store(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match self.store.kind {
            StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreKind::Directory => {
                let dir = self
                    .store_dir()
                    .ok_or_else(|| ConfigError::MissingField("store.path".to_string()))?;
                Ok(Arc::new(DirectoryStore::open(dir)?))
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(parent) = self.config_path.as_deref().and_then(Path::parent) {
            parent.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
