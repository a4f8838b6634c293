//! Contracts with the ORM collaborator
//!
//! The optimizer never reaches into the ORM's query execution. It consumes
//! entity metadata through `EntityCatalog`, runs queries and reloads through
//! `OrmAdapter`, and attaches tracking state to loaded records through
//! `TrackedRecord`. In the other direction the ORM calls the optimizer at
//! three points described by `QueryHooks`.

use crate::query::{CallContext, FindOptions, OptimizedQuery, QueryContext};
use crate::record::{ColumnAccess, RecordTracking};
use frugal_types::EntityType;
use std::collections::BTreeSet;

/// Entity metadata supplied by the ORM
pub trait EntityCatalog: Send + Sync {
    /// Declared columns, in table order
    fn column_names(&self, entity: &EntityType) -> Vec<String>;

    fn primary_key(&self, entity: &EntityType) -> Option<String>;

    /// Discriminator column for single-table inheritance
    fn inheritance_column(&self, entity: &EntityType) -> Option<String>;

    /// To-one, non-polymorphic associations
    fn preloadable_associations(&self, entity: &EntityType) -> BTreeSet<String>;
}

/// A loaded entity instance that can carry tracking state
pub trait TrackedRecord {
    fn tracking(&self) -> Option<&RecordTracking>;

    fn tracking_mut(&mut self) -> Option<&mut RecordTracking>;

    fn attach_tracking(&mut self, tracking: RecordTracking);
}

/// Query execution provided by the ORM
pub trait OrmAdapter: EntityCatalog + 'static {
    type Record: TrackedRecord;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run a find with already-optimized options
    fn execute_select(
        &self,
        entity: &EntityType,
        options: &FindOptions,
        ctx: &QueryContext,
    ) -> Result<Vec<Self::Record>, Self::Error>;

    /// Fetch `columns` for an already-loaded record and assign them
    fn reload(
        &self,
        record: &mut Self::Record,
        columns: &[String],
        ctx: &QueryContext,
    ) -> Result<(), Self::Error>;
}

/// Raw SQL execution, for ORMs that expose a find-by-SQL entry point
pub trait SqlAdapter: OrmAdapter {
    /// Table name as it appears in the entity's SELECT statements
    fn table_name(&self, entity: &EntityType) -> String;

    fn execute_sql(
        &self,
        entity: &EntityType,
        sql: &str,
        ctx: &QueryContext,
    ) -> Result<Vec<Self::Record>, Self::Error>;
}

/// Entry points the ORM calls instead of having its methods wrapped
pub trait QueryHooks<R> {
    type Error;

    /// Rewrite a find before it executes
    fn before_query(
        &self,
        entity: &EntityType,
        options: FindOptions,
        ctx: &CallContext,
    ) -> OptimizedQuery;

    /// A column read found no loaded value on `record`
    fn on_column_miss(&self, record: &mut R, column: &str) -> Result<ColumnAccess, Self::Error>;

    /// The record is about to be deleted, destroyed or serialized
    fn before_destroy(&self, record: &mut R) -> Result<(), Self::Error>;
}
