//! Query options, query shapes and the explicit call context
//!
//! `FindOptions` is the structured query the ORM hands to the optimizer.
//! `QueryShape` is its normalized form with every variable predicate
//! stripped, which is what signatures are computed from. `CallContext` and
//! `QueryContext` carry per-call state explicitly through the call path.

use crate::callsite::Callsite;
use crate::record::RecordTracking;
use crate::resource::Resource;
use crate::signature::Signature;
use crate::Bypass;
use frugal_types::{EntityType, Frame, Includes};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

static WHERE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("valid where regex"));
static CLAUSE_AFTER_WHERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(group\s+by|order\s+by|having|limit|offset)\b")
        .expect("valid clause regex")
});
static PAGING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(limit|offset)\s+\d+").expect("valid paging regex"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Structured find options as issued by the ORM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default)]
    pub select: Option<Vec<String>>,

    #[serde(default)]
    pub conditions: Option<String>,

    #[serde(default)]
    pub joins: Vec<String>,

    #[serde(default)]
    pub order: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub include: Option<Includes>,

    #[serde(default)]
    pub limit: Option<u64>,

    #[serde(default)]
    pub offset: Option<u64>,

    #[serde(default)]
    pub readonly: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn conditions(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    pub fn join(mut self, join: impl Into<String>) -> Self {
        self.joins.push(join.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn include(mut self, include: Includes) -> Self {
        self.include = Some(include);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Structural shape, ignoring conditions and paging values
    pub fn shape(&self) -> QueryShape {
        let select = match &self.select {
            Some(columns) => columns.join(","),
            None => "*".to_string(),
        };
        let include = self
            .include
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        QueryShape(format!(
            "select={};joins={};order={};group={};include={};readonly={}",
            select,
            self.joins.join(","),
            self.order.as_deref().unwrap_or(""),
            self.group.as_deref().unwrap_or(""),
            include,
            self.readonly,
        ))
    }
}

/// Normalized structural shape of a query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryShape(String);

impl QueryShape {
    /// Normalize raw SELECT text.
    ///
    /// The WHERE clause is removed up to the next GROUP BY / ORDER BY /
    /// HAVING / LIMIT / OFFSET keyword, and LIMIT/OFFSET literals are
    /// replaced with placeholders.
    ///
    /// The text is not parsed. The first `WHERE` keyword anywhere in the
    /// statement starts the stripped span, including one inside a subquery
    /// or a string literal, so such statements can share a shape with
    /// statements that differ after that point.
    pub fn from_sql(sql: &str) -> Self {
        let mut stripped = sql.to_string();

        if let Some(start) = WHERE_CLAUSE.find(sql) {
            let rest = &sql[start.end()..];
            let end = CLAUSE_AFTER_WHERE
                .find(rest)
                .map(|m| start.end() + m.start())
                .unwrap_or(sql.len());
            stripped = format!("{} {}", &sql[..start.start()], &sql[end..]);
        }

        let stripped = PAGING_LITERAL.replace_all(&stripped, "$1 ?");
        let normalized = WHITESPACE.replace_all(stripped.trim(), " ");
        QueryShape(normalized.into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call state threaded from the host into `optimize_query`.
///
/// Carries the sampled call stack, the resource being tracked for the
/// current unit of work, and the preload reentrancy marker.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    stack: Vec<Frame>,
    resource: Option<Arc<Resource>>,
    preload_depth: usize,
}

impl CallContext {
    pub fn new(stack: Vec<Frame>) -> Self {
        Self {
            stack,
            resource: None,
            preload_depth: 0,
        }
    }

    pub fn with_resource(mut self, resource: Arc<Resource>) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    /// True while inside an association preload scope
    pub fn is_preloading(&self) -> bool {
        self.preload_depth > 0
    }

    /// Mark the start of association preload execution.
    ///
    /// The marker is cleared when the returned scope is dropped. Queries
    /// issued through the scope bypass optimization.
    pub fn enter_preload(&mut self) -> PreloadScope<'_> {
        self.preload_depth += 1;
        PreloadScope { ctx: self }
    }
}

/// Guard for an association preload scope
#[derive(Debug)]
pub struct PreloadScope<'a> {
    ctx: &'a mut CallContext,
}

impl Deref for PreloadScope<'_> {
    type Target = CallContext;

    fn deref(&self) -> &CallContext {
        &*self.ctx
    }
}

impl DerefMut for PreloadScope<'_> {
    fn deref_mut(&mut self) -> &mut CallContext {
        &mut *self.ctx
    }
}

impl Drop for PreloadScope<'_> {
    fn drop(&mut self) {
        self.ctx.preload_depth = self.ctx.preload_depth.saturating_sub(1);
    }
}

/// Optimization settings for one query, passed to `execute_select` and
/// `reload` in place of ambient per-thread state
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub entity: EntityType,

    /// Callsite shaping this query, `None` when passed through
    pub callsite: Option<Arc<Callsite>>,

    /// Columns the query fetches for the entity
    pub columns: BTreeSet<String>,

    pub resource: Option<Arc<Resource>>,
}

impl QueryContext {
    pub fn passthrough(entity: EntityType, resource: Option<Arc<Resource>>) -> Self {
        Self {
            entity,
            callsite: None,
            columns: BTreeSet::new(),
            resource,
        }
    }

    pub fn is_optimized(&self) -> bool {
        self.callsite.is_some()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.callsite.as_ref().map(|c| c.signature())
    }

    /// Tracking state for a record instantiated by this query
    pub fn tracking(&self) -> Option<RecordTracking> {
        self.callsite.as_ref().map(|callsite| {
            RecordTracking::new(
                self.entity.clone(),
                callsite.signature().clone(),
                self.columns.clone(),
                self.resource.clone(),
            )
        })
    }
}

/// Result of `optimize_query`
#[derive(Debug, Clone)]
pub struct OptimizedQuery {
    pub options: FindOptions,
    pub context: QueryContext,

    /// Set when the options were passed through untouched
    pub bypass: Option<Bypass>,
}

impl OptimizedQuery {
    pub fn passthrough(
        entity: EntityType,
        options: FindOptions,
        resource: Option<Arc<Resource>>,
        reason: Bypass,
    ) -> Self {
        Self {
            options,
            context: QueryContext::passthrough(entity, resource),
            bypass: Some(reason),
        }
    }

    pub fn is_optimized(&self) -> bool {
        self.bypass.is_none()
    }
}

/// Result of `optimize_sql`
#[derive(Debug, Clone)]
pub struct OptimizedSql {
    pub sql: String,
    pub context: QueryContext,

    /// Set when the statement was passed through untouched
    pub bypass: Option<Bypass>,
}

impl OptimizedSql {
    pub fn passthrough(
        entity: EntityType,
        sql: &str,
        resource: Option<Arc<Resource>>,
        reason: Bypass,
    ) -> Self {
        Self {
            sql: sql.to_string(),
            context: QueryContext::passthrough(entity, resource),
            bypass: Some(reason),
        }
    }

    pub fn is_optimized(&self) -> bool {
        self.bypass.is_none()
    }
}
