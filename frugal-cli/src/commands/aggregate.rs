//! Fold every synchronized snapshot into one tracker and report it.

use super::StoreSource;
use anyhow::{Context, Result};
use frugal_core::{ResourceSnapshot, Tracker};
use frugal_types::EntityType;
use serde::Serialize;

#[derive(Serialize)]
struct AggregateSummary<'a> {
    snapshots: usize,
    missing: &'a [String],
    corrupt: &'a [String],
    resources: Vec<ResourceSnapshot>,
}

/// Aggregate the shared store, optionally narrowed to one entity.
pub fn aggregate_store(source: &StoreSource, entity: Option<&str>, json: bool) -> Result<()> {
    let aggregator = source.aggregator()?;
    let tracker = Tracker::new();
    let report = aggregator
        .aggregate(&tracker)
        .context("Failed to aggregate snapshots")?;
    let entity = entity.map(EntityType::from);

    let resources: Vec<_> = tracker
        .resources()
        .into_iter()
        .filter(|r| entity.as_ref().map_or(true, |e| r.entities().contains(e)))
        .collect();

    if json {
        let summary = AggregateSummary {
            snapshots: report.snapshots,
            missing: &report.missing,
            corrupt: &report.corrupt,
            resources: resources
                .iter()
                .map(|r| narrow(r.snapshot(), entity.as_ref()))
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", report);
    for resource in &resources {
        match &entity {
            None => print!("{}", resource),
            Some(entity) => {
                println!("{}", resource.signature());
                let columns: Vec<String> = resource.columns(entity).into_iter().collect();
                let associations: Vec<String> = resource.associations(entity).into_iter().collect();
                println!("  {} select=[{}]", entity, columns.join(", "));
                if !associations.is_empty() {
                    println!("  {} include=[{}]", entity, associations.join(", "));
                }
            }
        }
    }

    Ok(())
}

/// Drop every entity but `entity` from a snapshot
fn narrow(mut snapshot: ResourceSnapshot, entity: Option<&EntityType>) -> ResourceSnapshot {
    if let Some(entity) = entity {
        snapshot.columns.retain(|name, _| name == entity.as_str());
        snapshot.associations.retain(|name, _| name == entity.as_str());
    }
    snapshot
}
