//! Per-record tracking state
//!
//! Every record loaded through an optimized query carries a
//! `RecordTracking`: which columns it actually holds, which callsite
//! loaded it, and where it is in the load state machine.
//!
//! ```text
//! Partial --miss--> Escalating --reload ok--> Complete
//!    ^                  |
//!    +---reload failed--+
//! ```

use crate::resource::Resource;
use crate::signature::Signature;
use frugal_types::EntityType;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Load state of a tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Loaded with a subset of its columns
    Partial,

    /// Full reload in flight
    Escalating,

    /// Every column has been fetched
    Complete,
}

/// Outcome of reporting a column read to the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnAccess {
    /// Record is not tracked; read normally
    Untracked,

    /// Column already loaded
    Present,

    /// Not a declared column of the entity
    NotAColumn,

    /// Triggered the record's one full reload
    Escalated,

    /// Record was already complete; column registered with its callsite
    Learned,

    /// A reload for this record is already in flight
    Pending,
}

/// Tracking state companion of a loaded record
#[derive(Debug, Clone)]
pub struct RecordTracking {
    enabled: bool,
    entity: EntityType,
    signature: Signature,
    own_columns: BTreeSet<String>,
    seen_associations: BTreeSet<String>,
    state: LoadState,
    resource: Option<Arc<Resource>>,
}

/// Saved tracking state, for restoring after a failed operation
#[derive(Debug, Clone)]
pub struct TrackingSnapshot {
    enabled: bool,
    own_columns: BTreeSet<String>,
    seen_associations: BTreeSet<String>,
    state: LoadState,
}

impl RecordTracking {
    pub fn new(
        entity: EntityType,
        signature: Signature,
        own_columns: BTreeSet<String>,
        resource: Option<Arc<Resource>>,
    ) -> Self {
        RecordTracking {
            enabled: true,
            entity,
            signature,
            own_columns,
            seen_associations: BTreeSet::new(),
            state: LoadState::Partial,
            resource,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stop tracking this record; every column is treated as present
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn own_columns(&self) -> &BTreeSet<String> {
        &self.own_columns
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.state == LoadState::Complete
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    /// Whether a read of `column` can be served from memory
    pub fn has_column(&self, column: &str) -> bool {
        !self.enabled || self.own_columns.contains(column)
    }

    /// An in-memory assignment; the column must not be refetched
    pub fn mark_assigned(&mut self, column: &str) {
        self.own_columns.insert(column.to_string());
    }

    pub fn has_seen_association(&self, association: &str) -> bool {
        self.seen_associations.contains(association)
    }

    /// Returns true the first time an association is seen on this record
    pub fn mark_association_seen(&mut self, association: &str) -> bool {
        self.seen_associations.insert(association.to_string())
    }

    /// Declared columns this record has not loaded
    pub fn missing_columns(&self, declared: &[String]) -> Vec<String> {
        declared
            .iter()
            .filter(|column| !self.own_columns.contains(*column))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            enabled: self.enabled,
            own_columns: self.own_columns.clone(),
            seen_associations: self.seen_associations.clone(),
            state: self.state,
        }
    }

    pub fn restore(&mut self, snapshot: TrackingSnapshot) {
        self.enabled = snapshot.enabled;
        self.own_columns = snapshot.own_columns;
        self.seen_associations = snapshot.seen_associations;
        self.state = snapshot.state;
    }

    pub(crate) fn begin_escalation(&mut self) {
        self.state = LoadState::Escalating;
    }

    pub(crate) fn finish_escalation(&mut self) {
        self.state = LoadState::Complete;
    }

    /// Record that every declared column is now held
    pub(crate) fn absorb_all(&mut self, declared: &[String]) {
        self.own_columns.extend(declared.iter().cloned());
    }
}
