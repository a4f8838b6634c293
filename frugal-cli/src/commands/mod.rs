//! CLI command implementations.

pub mod aggregate;
pub mod inspect;

pub use aggregate::aggregate_store;
pub use inspect::inspect_store;

use anyhow::{Context, Result};
use frugal_core::{Aggregator, CacheStore, DirectoryStore, OptimizerConfig, StoreKind};
use std::path::PathBuf;
use std::sync::Arc;

/// Where the shared cache lives: a config file, optionally overridden by
/// an explicit store directory
pub struct StoreSource {
    pub config: PathBuf,
    pub store: Option<PathBuf>,
}

impl StoreSource {
    fn load_config(&self) -> Result<OptimizerConfig> {
        if self.store.is_some() && !self.config.exists() {
            return Ok(OptimizerConfig::default());
        }
        OptimizerConfig::from_file(&self.config).with_context(|| {
            format!("Failed to load configuration from {}", self.config.display())
        })
    }

    /// Read-only aggregator over the shared store
    pub fn aggregator(&self) -> Result<Aggregator> {
        let config = self.load_config()?;

        let store: Arc<dyn CacheStore> = match &self.store {
            Some(dir) => Arc::new(
                DirectoryStore::open(dir)
                    .with_context(|| format!("Failed to open store {}", dir.display()))?,
            ),
            None => {
                if config.store.kind != StoreKind::Directory {
                    anyhow::bail!(
                        "{} configures an in-memory store; nothing is shared to inspect",
                        self.config.display()
                    );
                }
                config.build_store().context("Failed to open configured store")?
            }
        };

        Ok(Aggregator::with_sync_signature(
            store,
            format!("{}_cli", config.sync_prefix),
            &config.aggregation_key,
        ))
    }
}
