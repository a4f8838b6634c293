//! Per-entity registry of callsites
//!
//! The registry is an explicit object: construct one per process and
//! hand it to whatever needs it. It owns every `Callsite` it creates.

use crate::callsite::Callsite;
use crate::orm::EntityCatalog;
use crate::signature::Signature;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use frugal_types::EntityType;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type CallsiteTable = DashMap<Signature, Arc<Callsite>>;

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub entities: usize,
    pub callsites: usize,
    pub created: u64,
}

/// Map from entity type to its signature -> callsite table
pub struct CallsiteRegistry {
    catalog: Arc<dyn EntityCatalog>,
    tables: DashMap<EntityType, Arc<CallsiteTable>>,
    created: AtomicU64,
}

impl CallsiteRegistry {
    pub fn new(catalog: Arc<dyn EntityCatalog>) -> Self {
        CallsiteRegistry {
            catalog,
            tables: DashMap::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Fetch or create the callsite for a signature.
    ///
    /// A new callsite is seeded with the primary key and, when the entity
    /// declares its inheritance column, the discriminator column.
    pub fn resolve(&self, entity: &EntityType, signature: &Signature) -> Arc<Callsite> {
        let table = self.table(entity);
        if let Some(existing) = table.get(signature) {
            return Arc::clone(existing.value());
        }

        // Catalog lookups happen before any shard lock is taken
        let candidate = Arc::new(Callsite::new(
            entity.clone(),
            signature.clone(),
            self.default_columns(entity),
            self.catalog.preloadable_associations(entity),
        ));

        let resolved = match table.entry(signature.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity = %entity, signature = %signature, "callsite created");
                vacant.insert(Arc::clone(&candidate));
                candidate
            }
        };
        resolved
    }

    /// Look up a callsite without creating it
    pub fn get(&self, entity: &EntityType, signature: &Signature) -> Option<Arc<Callsite>> {
        self.tables
            .get(entity)
            .and_then(|table| table.get(signature).map(|c| Arc::clone(c.value())))
    }

    /// All callsites known for an entity
    pub fn callsites(&self, entity: &EntityType) -> Vec<Arc<Callsite>> {
        self.tables
            .get(entity)
            .map(|table| table.iter().map(|c| Arc::clone(c.value())).collect())
            .unwrap_or_default()
    }

    /// Forget every callsite learned for an entity, returning how many.
    ///
    /// The entity's table is emptied in place, so a `resolve` that already
    /// holds it still inserts into the live table.
    pub fn flush(&self, entity: &EntityType) -> usize {
        let flushed = match self.tables.get(entity) {
            Some(table) => {
                let flushed = table.len();
                table.clear();
                flushed
            }
            None => 0,
        };
        tracing::debug!(entity = %entity, flushed, "callsites flushed");
        flushed
    }

    /// Forget everything
    pub fn clear(&self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.iter().map(|table| table.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            entities: self.tables.len(),
            callsites: self.len(),
            created: self.created.load(Ordering::Relaxed),
        }
    }

    fn table(&self, entity: &EntityType) -> Arc<CallsiteTable> {
        if let Some(table) = self.tables.get(entity) {
            return Arc::clone(table.value());
        }
        Arc::clone(
            self.tables
                .entry(entity.clone())
                .or_insert_with(|| Arc::new(DashMap::new()))
                .value(),
        )
    }

    fn default_columns(&self, entity: &EntityType) -> BTreeSet<String> {
        let mut defaults = BTreeSet::new();
        let columns = self.catalog.column_names(entity);

        if let Some(primary_key) = self.catalog.primary_key(entity) {
            if !primary_key.is_empty() {
                defaults.insert(primary_key);
            }
        }
        if let Some(inheritance) = self.catalog.inheritance_column(entity) {
            if columns.contains(&inheritance) {
                defaults.insert(inheritance);
            }
        }

        defaults
    }
}

impl fmt::Debug for CallsiteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallsiteRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}
