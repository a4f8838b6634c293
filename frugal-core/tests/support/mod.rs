//! In-memory ORM used by the integration tests
//!
//! Tables hold string-valued rows. Every select and reload is recorded so
//! tests can assert on what the optimizer asked for.

#![allow(dead_code)]

use frugal_core::prelude::*;
use frugal_core::{MemoryStore, RecordTracking};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    #[error("select failed for {0}")]
    Select(String),

    #[error("reload failed for {0}")]
    Reload(String),

    #[error("no row with id {0}")]
    NotFound(String),
}

/// A loaded row plus its tracking companion
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub values: BTreeMap<String, String>,
    pub tracking: Option<RecordTracking>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

impl TrackedRecord for Row {
    fn tracking(&self) -> Option<&RecordTracking> {
        self.tracking.as_ref()
    }

    fn tracking_mut(&mut self) -> Option<&mut RecordTracking> {
        self.tracking.as_mut()
    }

    fn attach_tracking(&mut self, tracking: RecordTracking) {
        self.tracking = Some(tracking);
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    primary_key: Option<String>,
    inheritance: Option<String>,
    preloadable: BTreeSet<String>,
    rows: Vec<BTreeMap<String, String>>,
}

/// Issued select, as seen by the ORM
#[derive(Debug, Clone)]
pub struct SelectLog {
    pub entity: EntityType,
    pub options: FindOptions,
    pub optimized: bool,
}

#[derive(Debug, Default)]
pub struct MemoryOrm {
    tables: BTreeMap<EntityType, Table>,
    selects: Mutex<Vec<SelectLog>>,
    statements: Mutex<Vec<String>>,
    reloads: Mutex<Vec<Vec<String>>>,
    reload_count: AtomicUsize,
    fail_optimized: AtomicBool,
    fail_reload: AtomicBool,
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl MemoryOrm {
    /// Blog schema: `Post` (STI root), `Comment`, and a `Legacy` table
    /// whose primary key is not a declared column
    pub fn blog() -> Self {
        let mut orm = MemoryOrm::default();

        let post_columns = strings(&["id", "type", "title", "body", "published", "author_id"]);
        let posts = (1..=3)
            .map(|i| {
                post_columns
                    .iter()
                    .map(|c| (c.clone(), format!("{}-{}", c, i)))
                    .chain([("id".to_string(), i.to_string())])
                    .collect()
            })
            .collect();
        orm.tables.insert(
            EntityType::new("Post"),
            Table {
                columns: post_columns,
                primary_key: Some("id".into()),
                inheritance: Some("type".into()),
                preloadable: strings(&["author", "category"]).into_iter().collect(),
                rows: posts,
            },
        );

        let comment_columns = strings(&["id", "post_id", "body"]);
        orm.tables.insert(
            EntityType::new("Comment"),
            Table {
                rows: vec![comment_columns
                    .iter()
                    .map(|c| (c.clone(), format!("{}-1", c)))
                    .chain([("id".to_string(), "1".to_string())])
                    .collect()],
                columns: comment_columns,
                primary_key: Some("id".into()),
                inheritance: Some("type".into()),
                preloadable: strings(&["post"]).into_iter().collect(),
            },
        );

        orm.tables.insert(
            EntityType::new("Legacy"),
            Table {
                columns: strings(&["code", "name"]),
                primary_key: Some("id".into()),
                ..Table::default()
            },
        );

        orm
    }

    pub fn fail_optimized_selects(&self, fail: bool) {
        self.fail_optimized.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reloads(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.load(Ordering::SeqCst)
    }

    /// Column lists of every reload so far
    pub fn reloads(&self) -> Vec<Vec<String>> {
        self.reloads.lock().unwrap().clone()
    }

    pub fn selects(&self) -> Vec<SelectLog> {
        self.selects.lock().unwrap().clone()
    }

    pub fn last_select(&self) -> Option<SelectLog> {
        self.selects.lock().unwrap().last().cloned()
    }

    /// Raw statements as executed
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last_statement(&self) -> Option<String> {
        self.statements.lock().unwrap().last().cloned()
    }

    fn table(&self, entity: &EntityType) -> Option<&Table> {
        self.tables.get(entity)
    }
}

impl EntityCatalog for MemoryOrm {
    fn column_names(&self, entity: &EntityType) -> Vec<String> {
        self.table(entity).map(|t| t.columns.clone()).unwrap_or_default()
    }

    fn primary_key(&self, entity: &EntityType) -> Option<String> {
        self.table(entity).and_then(|t| t.primary_key.clone())
    }

    fn inheritance_column(&self, entity: &EntityType) -> Option<String> {
        self.table(entity).and_then(|t| t.inheritance.clone())
    }

    fn preloadable_associations(&self, entity: &EntityType) -> BTreeSet<String> {
        self.table(entity).map(|t| t.preloadable.clone()).unwrap_or_default()
    }
}

impl OrmAdapter for MemoryOrm {
    type Record = Row;
    type Error = OrmError;

    fn execute_select(
        &self,
        entity: &EntityType,
        options: &FindOptions,
        ctx: &QueryContext,
    ) -> Result<Vec<Row>, OrmError> {
        self.selects.lock().unwrap().push(SelectLog {
            entity: entity.clone(),
            options: options.clone(),
            optimized: ctx.is_optimized(),
        });

        if ctx.is_optimized() && self.fail_optimized.load(Ordering::SeqCst) {
            return Err(OrmError::Select(entity.to_string()));
        }

        let table = self
            .table(entity)
            .ok_or_else(|| OrmError::Select(entity.to_string()))?;
        let selected: Vec<String> = match &options.select {
            Some(columns) if !columns.iter().any(|c| c == "*") => columns.clone(),
            _ => table.columns.clone(),
        };

        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(table
            .rows
            .iter()
            .take(limit)
            .map(|row| Row {
                values: selected
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect(),
                tracking: None,
            })
            .collect())
    }

    fn reload(&self, record: &mut Row, columns: &[String], ctx: &QueryContext) -> Result<(), OrmError> {
        self.reload_count.fetch_add(1, Ordering::SeqCst);
        self.reloads.lock().unwrap().push(columns.to_vec());

        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(OrmError::Reload(ctx.entity.to_string()));
        }

        let id = record.get("id").unwrap_or_default().to_string();
        let table = self
            .table(&ctx.entity)
            .ok_or_else(|| OrmError::NotFound(id.clone()))?;
        let row = table
            .rows
            .iter()
            .find(|row| row.get("id").map(String::as_str) == Some(id.as_str()))
            .ok_or_else(|| OrmError::NotFound(id.clone()))?;

        for column in columns {
            if let Some(value) = row.get(column) {
                record.values.insert(column.clone(), value.clone());
            }
        }
        Ok(())
    }
}

impl SqlAdapter for MemoryOrm {
    fn table_name(&self, entity: &EntityType) -> String {
        format!("{}s", entity.as_str().to_lowercase())
    }

    /// Understands `SELECT <list> FROM ...`, ignoring everything after FROM
    fn execute_sql(&self, entity: &EntityType, sql: &str, ctx: &QueryContext) -> Result<Vec<Row>, OrmError> {
        self.statements.lock().unwrap().push(sql.to_string());

        if ctx.is_optimized() && self.fail_optimized.load(Ordering::SeqCst) {
            return Err(OrmError::Select(entity.to_string()));
        }

        let table = self
            .table(entity)
            .ok_or_else(|| OrmError::Select(entity.to_string()))?;
        let list = sql
            .strip_prefix("SELECT ")
            .and_then(|rest| rest.split(" FROM ").next())
            .ok_or_else(|| OrmError::Select(sql.to_string()))?;
        let prefix = format!("{}.", self.table_name(entity));
        let selected: Vec<String> = list
            .split(',')
            .map(|c| c.trim().trim_matches('`').trim_start_matches(prefix.as_str()))
            .flat_map(|c| match c {
                "*" => table.columns.clone(),
                c => vec![c.to_string()],
            })
            .collect();

        Ok(table
            .rows
            .iter()
            .map(|row| Row {
                values: selected
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect(),
                tracking: None,
            })
            .collect())
    }
}

pub fn optimizer() -> Optimizer<MemoryOrm> {
    optimizer_with(OptimizerConfig::default())
}

pub fn optimizer_with(config: OptimizerConfig) -> Optimizer<MemoryOrm> {
    Optimizer::new(Arc::new(MemoryOrm::blog()), config, Arc::new(MemoryStore::new()))
}

pub fn post() -> EntityType {
    EntityType::new("Post")
}

/// Call stack of a query issued from `line` of the posts controller
pub fn call_from(line: u32) -> CallContext {
    CallContext::new(vec![
        Frame::new("app/controllers/posts_controller.rs", line, "index"),
        Frame::new("app/router.rs", 12, "dispatch"),
    ])
}

/// Read a column the way an ORM attribute reader would
pub fn read(optimizer: &Optimizer<MemoryOrm>, row: &mut Row, column: &str) -> Option<String> {
    let tracked_miss = row
        .tracking()
        .map(|t| t.is_enabled() && !t.has_column(column))
        .unwrap_or(false);
    if tracked_miss {
        optimizer
            .record_column_miss(row, column)
            .expect("column miss handling failed");
    }
    row.values.get(column).cloned()
}

/// Assign a column in memory
pub fn write(optimizer: &Optimizer<MemoryOrm>, row: &mut Row, column: &str, value: &str) {
    row.values.insert(column.to_string(), value.to_string());
    optimizer.assign_column(row, column);
}

pub fn names(set: &BTreeSet<String>) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}
