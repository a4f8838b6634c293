//! Frugal: adaptive column and association learning for ORM queries
//!
//! The optimizer learns, per call-site, which columns and associations the
//! code after a query actually touches, and rewrites later queries from the
//! same call-site to fetch only those.
//!
//! # Architecture
//!
//! ```text
//! SignatureComputer → CallsiteRegistry → Callsite ─┬─ select list
//!                                                  └─ PreloadAdvisor → includes
//! loaded record ── miss ──▶ MissingAttributeProtocol ──▶ Callsite (feedback)
//! Resource ──▶ Tracker ──▶ Aggregator ──▶ CacheStore (shared across processes)
//! ```
//!
//! - **Signatures**: a query's normalized shape plus a sample of its call
//!   stack. Changing only filter values keeps the signature.
//! - **Callsites**: per-signature learned column and association sets that
//!   only grow, always containing the primary key.
//! - **Escalation**: the first read of an unloaded column on a record
//!   reloads everything it is missing, once.
//! - **Resources**: per-request usage, deduplicated in a tracker and
//!   synchronized into a shared cache for cross-process aggregation.
//!
//! The ORM is an external collaborator reached through the traits in
//! [`orm`]. Every per-call input travels in an explicit [`CallContext`] or
//! [`QueryContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use frugal_core::prelude::*;
//!
//! let optimizer = Optimizer::from_config(adapter, OptimizerConfig::default())?;
//! let ctx = CallContext::new(host.call_stack());
//!
//! let mut posts = optimizer.find(&EntityType::new("Post"), FindOptions::new(), &ctx)?;
//! // Later, the host reports a read of an unloaded column:
//! optimizer.record_column_miss(&mut posts[0], "body")?;
//! ```

pub mod advisor;
pub mod aggregator;
pub mod callsite;
pub mod config;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod orm;
pub mod protocol;
pub mod query;
pub mod record;
pub mod registry;
pub mod resource;
pub mod signature;
pub mod store;
pub mod tracker;

pub use advisor::PreloadAdvisor;
pub use aggregator::{AggregateReport, Aggregator, SyncReport};
pub use callsite::Callsite;
pub use config::{ConfigError, OptimizerConfig, StoreConfig, StoreKind};
pub use error::{Bypass, FrugalError, SnapshotError, StoreError, SyncError};
pub use metrics::{MetricsSnapshot, OptimizerMetrics};
pub use optimizer::Optimizer;
pub use orm::{EntityCatalog, OrmAdapter, QueryHooks, SqlAdapter, TrackedRecord};
pub use protocol::{with_rollback, MissingAttributeProtocol};
pub use query::{
    CallContext, FindOptions, OptimizedQuery, OptimizedSql, PreloadScope, QueryContext, QueryShape,
};
pub use record::{ColumnAccess, LoadState, RecordTracking, TrackingSnapshot};
pub use registry::{CallsiteRegistry, RegistryStats};
pub use resource::{Resource, ResourceSnapshot};
pub use signature::{Signature, SignatureComputer, DEFAULT_FRAME_SAMPLE};
pub use store::{CacheStore, DirectoryStore, MemoryStore, StoreStats};
pub use tracker::Tracker;

pub use frugal_types::{EntityType, Frame, Includes, RequestFingerprint};

/// Commonly used types
pub mod prelude {
    pub use crate::{
        CallContext, CallsiteRegistry, ColumnAccess, EntityCatalog, EntityType, FindOptions,
        Frame, FrugalError, Includes, OptimizedQuery, OptimizedSql, Optimizer, OptimizerConfig,
        OrmAdapter, QueryContext, QueryHooks, RequestFingerprint, Resource, SqlAdapter,
        TrackedRecord, Tracker,
    };
}
