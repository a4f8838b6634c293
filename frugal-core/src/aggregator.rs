//! Cross-process synchronization of tracked resources
//!
//! Each process writes its tracker under its own synchronization signature
//! and registers that signature in a shared aggregation index. An
//! aggregation pass walks the index and folds every snapshot it finds into
//! one tracker.

use crate::error::{StoreError, SyncError};
use crate::store::CacheStore;
use crate::tracker::Tracker;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_SYNC_PREFIX: &str = "frugal_tracker";
pub const DEFAULT_AGGREGATION_KEY: &str = "frugal_tracker_aggregation";

/// Outcome of one synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub sync_signature: String,
    pub resources: usize,
    pub bytes: usize,

    /// Whether this call added the signature to the index
    pub registered: bool,
}

/// Outcome of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub snapshots: usize,

    /// Indexed signatures with no stored snapshot
    pub missing: Vec<String>,

    /// Indexed signatures whose snapshot could not be decoded
    pub corrupt: Vec<String>,

    /// Resources in the tracker after folding
    pub resources: usize,
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} snapshots folded into {} resources",
            self.snapshots, self.resources
        )?;
        if !self.missing.is_empty() {
            write!(f, ", {} missing", self.missing.len())?;
        }
        if !self.corrupt.is_empty() {
            write!(f, ", {} corrupt", self.corrupt.len())?;
        }
        Ok(())
    }
}

/// Reads and writes tracker snapshots in a shared `CacheStore`
pub struct Aggregator {
    store: Arc<dyn CacheStore>,
    sync_signature: String,
    aggregation_key: String,
}

impl Aggregator {
    /// Aggregator with a fresh process-unique synchronization signature
    pub fn new(store: Arc<dyn CacheStore>, prefix: &str, aggregation_key: &str) -> Self {
        let sync_signature = format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            Uuid::new_v4().simple()
        );
        Self::with_sync_signature(store, sync_signature, aggregation_key)
    }

    pub fn with_sync_signature(
        store: Arc<dyn CacheStore>,
        sync_signature: impl Into<String>,
        aggregation_key: &str,
    ) -> Self {
        Aggregator {
            store,
            sync_signature: sync_signature.into(),
            aggregation_key: aggregation_key.to_string(),
        }
    }

    pub fn sync_signature(&self) -> &str {
        &self.sync_signature
    }

    pub fn aggregation_key(&self) -> &str {
        &self.aggregation_key
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Write the tracker's snapshot list, then register it in the index
    pub fn synchronize(&self, tracker: &Tracker) -> Result<SyncReport, SyncError> {
        let bytes = tracker.to_bytes()?;
        self.store.write(&self.sync_signature, &bytes)?;

        let mut index = self.signatures()?;
        let registered = !index.contains(&self.sync_signature);
        if registered {
            index.push(self.sync_signature.clone());
            self.write_index(&index)?;
        }

        let report = SyncReport {
            sync_signature: self.sync_signature.clone(),
            resources: tracker.len(),
            bytes: bytes.len(),
            registered,
        };
        tracing::info!(
            sync_signature = %report.sync_signature,
            resources = report.resources,
            bytes = report.bytes,
            "tracker synchronized"
        );
        Ok(report)
    }

    /// Synchronization signatures registered so far.
    ///
    /// An unreadable index is treated as empty.
    pub fn signatures(&self) -> Result<Vec<String>, StoreError> {
        let Some(bytes) = self.store.read(&self.aggregation_key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(index) => Ok(index),
            Err(err) => {
                tracing::warn!(key = %self.aggregation_key, "Discarding aggregation index: {}", err);
                Ok(Vec::new())
            }
        }
    }

    /// Fold every indexed snapshot into `tracker`
    pub fn aggregate(&self, tracker: &Tracker) -> Result<AggregateReport, StoreError> {
        let mut report = AggregateReport::default();

        for signature in self.signatures()? {
            let Some(bytes) = self.store.read(&signature)? else {
                report.missing.push(signature);
                continue;
            };
            match Tracker::decode(&bytes) {
                Ok(snapshots) => {
                    tracker.absorb(&snapshots);
                    report.snapshots += 1;
                }
                Err(err) => {
                    tracing::warn!(sync_signature = %signature, "Skipping snapshot: {}", err);
                    report.corrupt.push(signature);
                }
            }
        }

        report.resources = tracker.len();
        tracing::info!("Aggregated {}", report);
        Ok(report)
    }

    fn write_index(&self, index: &[String]) -> Result<(), StoreError> {
        // Vec<String> always serializes
        let bytes = serde_json::to_vec(index).unwrap_or_default();
        self.store.write(&self.aggregation_key, &bytes)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("sync_signature", &self.sync_signature)
            .field("aggregation_key", &self.aggregation_key)
            .finish()
    }
}
