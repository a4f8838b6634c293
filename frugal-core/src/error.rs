//! Error types for the optimizer core
//!
//! Only collaborator and storage failures surface as errors. Everything the
//! optimizer decides on its own (skipping a query, ignoring an association)
//! is reported as a plain value, never as an `Err`.

use frugal_types::EntityType;
use std::fmt;
use thiserror::Error;

/// Why a query was passed through without optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bypass {
    /// Optimization switched off in configuration
    Disabled,

    /// Issued from inside an association preload scope
    Reentrant,

    /// The entity does not declare its primary key as a column
    NoPrimaryKey,

    /// The catalog knows no columns for the entity
    UnknownEntity,

    /// Raw SQL that does not select every column of the entity's table
    NotSelectAll,
}

impl fmt::Display for Bypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bypass::Disabled => write!(f, "disabled"),
            Bypass::Reentrant => write!(f, "inside preload scope"),
            Bypass::NoPrimaryKey => write!(f, "no primary key column"),
            Bypass::UnknownEntity => write!(f, "unknown entity"),
            Bypass::NotSelectAll => write!(f, "not a SELECT * statement"),
        }
    }
}

/// Failures reported by the ORM collaborator while the core drives it
#[derive(Debug, Error)]
pub enum FrugalError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("Query for {entity} failed: {source}")]
    Query {
        entity: EntityType,
        #[source]
        source: E,
    },

    #[error("Reload of {entity} failed: {source}")]
    Reload {
        entity: EntityType,
        #[source]
        source: E,
    },
}

/// Shared cache backend failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on cache key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache directory unavailable: {0}")]
    Directory(#[from] std::io::Error),

    #[error("Cache key {0:?} is not a portable file name")]
    InvalidKey(String),
}

/// Tracker snapshot encode/decode failures
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to encode tracker snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode tracker snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Synchronization of tracked resources into the shared cache
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
