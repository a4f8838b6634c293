//! The optimizer facade
//!
//! `Optimizer` ties the pieces together for one ORM adapter: it rewrites
//! finds from their callsite, attaches tracking state to what they load,
//! drives the missing-attribute protocol, and owns the resource tracker.
//!
//! ```text
//! find ─▶ signature ─▶ callsite ─▶ select + includes ─▶ execute_select
//!                                                           │
//!   record miss ─▶ reload (once) ─▶ callsite.add_column ◀───┘
//! ```

use crate::advisor::PreloadAdvisor;
use crate::aggregator::{AggregateReport, Aggregator, SyncReport};
use crate::config::{ConfigError, OptimizerConfig};
use crate::error::{Bypass, FrugalError, StoreError, SyncError};
use crate::metrics::{MetricsSnapshot, OptimizerMetrics};
use crate::orm::{EntityCatalog, OrmAdapter, QueryHooks, SqlAdapter, TrackedRecord};
use crate::protocol::{self, MissingAttributeProtocol};
use crate::query::{CallContext, FindOptions, OptimizedQuery, OptimizedSql, QueryContext, QueryShape};
use crate::record::ColumnAccess;
use crate::registry::CallsiteRegistry;
use crate::resource::Resource;
use crate::signature::SignatureComputer;
use crate::store::CacheStore;
use crate::tracker::Tracker;
use frugal_types::EntityType;
use regex::{NoExpand, Regex};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Adaptive query optimizer for one ORM adapter
pub struct Optimizer<A: OrmAdapter> {
    adapter: Arc<A>,
    config: OptimizerConfig,
    signatures: SignatureComputer,
    registry: CallsiteRegistry,
    advisor: PreloadAdvisor,
    tracker: Tracker,
    aggregator: Aggregator,
    metrics: OptimizerMetrics,
}

impl<A: OrmAdapter> Optimizer<A> {
    pub fn new(adapter: Arc<A>, config: OptimizerConfig, store: Arc<dyn CacheStore>) -> Self {
        let catalog: Arc<dyn EntityCatalog> = adapter.clone();
        let aggregator = Aggregator::new(store, &config.sync_prefix, &config.aggregation_key);

        Optimizer {
            signatures: SignatureComputer::new(config.frame_sample),
            registry: CallsiteRegistry::new(catalog),
            advisor: PreloadAdvisor::new(),
            tracker: Tracker::new(),
            metrics: OptimizerMetrics::new(),
            aggregator,
            adapter,
            config,
        }
    }

    /// Build an optimizer with the store named in `config`
    pub fn from_config(adapter: Arc<A>, config: OptimizerConfig) -> Result<Self, ConfigError> {
        let store = config.build_store()?;
        Ok(Self::new(adapter, config, store))
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CallsiteRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Rewrite a find from its callsite.
    ///
    /// Never fails: anything that rules out optimization yields the
    /// original options with the reason in `OptimizedQuery::bypass`.
    pub fn optimize_query(
        &self,
        entity: &EntityType,
        options: FindOptions,
        ctx: &CallContext,
    ) -> OptimizedQuery {
        match self.plan(entity, &options, ctx) {
            Ok(query) => {
                self.metrics.record_optimized();
                query
            }
            Err(reason) => {
                self.metrics.record_bypass(reason);
                OptimizedQuery::passthrough(entity.clone(), options, ctx.resource().cloned(), reason)
            }
        }
    }

    /// Declared columns of `entity`, if a query for it may be optimized
    fn admit(&self, entity: &EntityType, ctx: &CallContext) -> Result<Vec<String>, Bypass> {
        if !self.config.enabled {
            return Err(Bypass::Disabled);
        }
        if ctx.is_preloading() {
            return Err(Bypass::Reentrant);
        }

        let declared = self.adapter.column_names(entity);
        if declared.is_empty() {
            return Err(Bypass::UnknownEntity);
        }
        match self.adapter.primary_key(entity) {
            Some(pk) if declared.contains(&pk) => Ok(declared),
            _ => Err(Bypass::NoPrimaryKey),
        }
    }

    fn plan(
        &self,
        entity: &EntityType,
        options: &FindOptions,
        ctx: &CallContext,
    ) -> Result<OptimizedQuery, Bypass> {
        let declared = self.admit(entity, ctx)?;
        let signature = self.signatures.compute(ctx.stack(), &options.shape());
        let callsite = self.registry.resolve(entity, &signature);

        let mut optimized = options.clone();
        let learned = callsite.select_columns();
        let mut select: Vec<String> = explicit_select(options)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        for column in declared.iter().filter(|c| learned.contains(*c)) {
            if !select.contains(column) {
                select.push(column.clone());
            }
        }
        let columns: BTreeSet<String> = select.iter().cloned().collect();
        optimized.select = Some(select);

        optimized.include = self
            .advisor
            .decide(&callsite, ctx, options.include.as_ref());

        let resource = ctx.resource().cloned();
        if let Some(resource) = &resource {
            resource.add_columns(entity, &columns);
        }

        tracing::debug!(entity = %entity, callsite = %callsite, "query optimized");

        Ok(OptimizedQuery {
            options: optimized,
            context: QueryContext {
                entity: entity.clone(),
                callsite: Some(callsite),
                columns,
                resource,
            },
            bypass: None,
        })
    }

    /// Run a find through the optimizer.
    ///
    /// Records from an optimized query carry tracking state. If the
    /// optimized query fails, it is retried once with the caller's
    /// original options.
    pub fn find(
        &self,
        entity: &EntityType,
        options: FindOptions,
        ctx: &CallContext,
    ) -> Result<Vec<A::Record>, FrugalError<A::Error>> {
        let query = self.optimize_query(entity, options.clone(), ctx);

        let mut records = match self
            .adapter
            .execute_select(entity, &query.options, &query.context)
        {
            Ok(records) => records,
            Err(err) if query.is_optimized() => {
                tracing::warn!(entity = %entity, "Optimized query failed, retrying unoptimized: {}", err);
                self.metrics.record_fallback();
                let fallback = QueryContext::passthrough(entity.clone(), ctx.resource().cloned());
                return self
                    .adapter
                    .execute_select(entity, &options, &fallback)
                    .map_err(|source| FrugalError::Query {
                        entity: entity.clone(),
                        source,
                    });
            }
            Err(source) => {
                return Err(FrugalError::Query {
                    entity: entity.clone(),
                    source,
                })
            }
        };

        attach_tracking(&mut records, &query.context);
        Ok(records)
    }

    pub fn protocol(&self) -> MissingAttributeProtocol<'_, A> {
        MissingAttributeProtocol::new(self.adapter.as_ref(), &self.registry, &self.metrics)
    }

    /// Report a read of a column the record does not hold
    pub fn record_column_miss(
        &self,
        record: &mut A::Record,
        column: &str,
    ) -> Result<ColumnAccess, FrugalError<A::Error>> {
        self.protocol().on_column_miss(record, column)
    }

    /// Report an association read or assignment
    pub fn record_association(&self, record: &mut A::Record, association: &str) -> bool {
        self.protocol().on_association(record, association)
    }

    /// Report an in-memory column assignment
    pub fn assign_column(&self, record: &mut A::Record, column: &str) {
        self.protocol().assign_column(record, column)
    }

    /// Fully load a record before it is deleted, destroyed or dumped
    pub fn complete_record(&self, record: &mut A::Record) -> Result<(), FrugalError<A::Error>> {
        self.protocol().complete(record)
    }

    pub fn with_rollback<T, E>(
        &self,
        record: &mut A::Record,
        op: impl FnOnce(&mut A::Record) -> Result<T, E>,
    ) -> Result<T, E> {
        protocol::with_rollback(record, op)
    }

    /// Forget everything learned for `entity`
    pub fn flush_callsites(&self, entity: &EntityType) -> usize {
        self.registry.flush(entity)
    }

    /// Run one unit of work for `resource`
    pub fn track<R>(&self, resource: Arc<Resource>, work: impl FnOnce(&Arc<Resource>) -> R) -> R {
        if !self.config.track_resources {
            return work(&resource);
        }
        self.tracker.track(resource, work)
    }

    /// Publish the tracker to the shared cache
    pub fn synchronize(&self) -> Result<SyncReport, SyncError> {
        let result = self.tracker.synchronize(&self.aggregator);
        if let Err(err) = &result {
            tracing::warn!("Tracker synchronization failed: {}", err);
        }
        self.metrics.record_sync(result.is_ok());
        result
    }

    /// Fold every process's published snapshot into the tracker
    pub fn aggregate(&self) -> Result<AggregateReport, StoreError> {
        self.aggregator.aggregate(&self.tracker)
    }
}

impl<A: SqlAdapter> Optimizer<A> {
    /// Rewrite a raw `SELECT *` statement from its callsite.
    ///
    /// The signature is computed from the statement's normalized shape, so
    /// statements differing only in their WHERE clause or paging literals
    /// share a callsite. Only a `SELECT *` (optionally qualified with the
    /// entity's table) is rewritten; anything else passes through.
    pub fn optimize_sql(&self, entity: &EntityType, sql: &str, ctx: &CallContext) -> OptimizedSql {
        match self.plan_sql(entity, sql, ctx) {
            Ok(query) => {
                self.metrics.record_optimized();
                query
            }
            Err(reason) => {
                self.metrics.record_bypass(reason);
                OptimizedSql::passthrough(entity.clone(), sql, ctx.resource().cloned(), reason)
            }
        }
    }

    fn plan_sql(
        &self,
        entity: &EntityType,
        sql: &str,
        ctx: &CallContext,
    ) -> Result<OptimizedSql, Bypass> {
        let declared = self.admit(entity, ctx)?;

        let table = self.adapter.table_name(entity);
        let select_all = Regex::new(&format!(
            r"(?i)SELECT\s+(`?(?:{})?`?\.?\*)",
            regex::escape(&table)
        ))
        .map_err(|_| Bypass::NotSelectAll)?;
        if !select_all.is_match(sql) {
            return Err(Bypass::NotSelectAll);
        }

        let signature = self.signatures.compute(ctx.stack(), &QueryShape::from_sql(sql));
        let callsite = self.registry.resolve(entity, &signature);

        let learned = callsite.select_columns();
        let select: Vec<String> = declared
            .iter()
            .filter(|c| learned.contains(*c))
            .map(|c| format!("{}.{}", table, c))
            .collect();
        let rewritten = select_all
            .replacen(sql, 1, NoExpand(&format!("SELECT {}", select.join(","))))
            .into_owned();

        let columns: BTreeSet<String> = declared
            .into_iter()
            .filter(|c| learned.contains(c))
            .collect();
        let resource = ctx.resource().cloned();
        if let Some(resource) = &resource {
            resource.add_columns(entity, &columns);
        }

        tracing::debug!(entity = %entity, callsite = %callsite, "raw query optimized");

        Ok(OptimizedSql {
            sql: rewritten,
            context: QueryContext {
                entity: entity.clone(),
                callsite: Some(callsite),
                columns,
                resource,
            },
            bypass: None,
        })
    }

    /// Run a raw statement through the optimizer.
    ///
    /// Behaves like `find`: records from a rewritten statement carry
    /// tracking state, and a failed rewrite is retried once as written.
    pub fn find_by_sql(
        &self,
        entity: &EntityType,
        sql: &str,
        ctx: &CallContext,
    ) -> Result<Vec<A::Record>, FrugalError<A::Error>> {
        let query = self.optimize_sql(entity, sql, ctx);

        let mut records = match self.adapter.execute_sql(entity, &query.sql, &query.context) {
            Ok(records) => records,
            Err(err) if query.is_optimized() => {
                tracing::warn!(entity = %entity, "Optimized SQL failed, retrying unoptimized: {}", err);
                self.metrics.record_fallback();
                let fallback = QueryContext::passthrough(entity.clone(), ctx.resource().cloned());
                return self
                    .adapter
                    .execute_sql(entity, sql, &fallback)
                    .map_err(|source| FrugalError::Query {
                        entity: entity.clone(),
                        source,
                    });
            }
            Err(source) => {
                return Err(FrugalError::Query {
                    entity: entity.clone(),
                    source,
                })
            }
        };

        attach_tracking(&mut records, &query.context);
        Ok(records)
    }
}

impl<A: OrmAdapter> QueryHooks<A::Record> for Optimizer<A> {
    type Error = FrugalError<A::Error>;

    fn before_query(
        &self,
        entity: &EntityType,
        options: FindOptions,
        ctx: &CallContext,
    ) -> OptimizedQuery {
        self.optimize_query(entity, options, ctx)
    }

    fn on_column_miss(
        &self,
        record: &mut A::Record,
        column: &str,
    ) -> Result<ColumnAccess, Self::Error> {
        self.record_column_miss(record, column)
    }

    fn before_destroy(&self, record: &mut A::Record) -> Result<(), Self::Error> {
        self.complete_record(record)
    }
}

impl<A: OrmAdapter> std::fmt::Debug for Optimizer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("enabled", &self.config.enabled)
            .field("registry", &self.registry)
            .field("tracker", &self.tracker)
            .field("aggregator", &self.aggregator)
            .finish()
    }
}

/// Give each record loaded by an optimized query its tracking state
fn attach_tracking<R: TrackedRecord>(records: &mut [R], context: &QueryContext) {
    if !context.is_optimized() {
        return;
    }
    for record in records {
        if let Some(tracking) = context.tracking() {
            record.attach_tracking(tracking);
        }
    }
}

/// The caller's own select list, unless it selects everything
fn explicit_select(options: &FindOptions) -> Option<&[String]> {
    options
        .select
        .as_deref()
        .filter(|columns| !columns.iter().any(|c| c == "*"))
}
