//! List the per-process snapshots registered in the aggregation index.

use super::StoreSource;
use anyhow::{Context, Result};
use frugal_core::Tracker;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum SnapshotStatus {
    Ok,
    Missing,
    Corrupt,
}

#[derive(Debug, Serialize)]
struct SnapshotEntry {
    sync_signature: String,
    status: SnapshotStatus,
    resources: usize,
    bytes: usize,
}

#[derive(Serialize)]
struct InspectSummary<'a> {
    aggregation_key: &'a str,
    snapshots: &'a [SnapshotEntry],
}

/// Print each indexed snapshot and whether it can be read back.
pub fn inspect_store(source: &StoreSource, json: bool) -> Result<()> {
    let aggregator = source.aggregator()?;
    let signatures = aggregator
        .signatures()
        .context("Failed to read aggregation index")?;

    let mut entries = Vec::with_capacity(signatures.len());
    for signature in signatures {
        let bytes = aggregator
            .store()
            .read(&signature)
            .with_context(|| format!("Failed to read snapshot {}", signature))?;

        let entry = match bytes {
            None => SnapshotEntry {
                sync_signature: signature,
                status: SnapshotStatus::Missing,
                resources: 0,
                bytes: 0,
            },
            Some(bytes) => match Tracker::decode(&bytes) {
                Ok(snapshots) => SnapshotEntry {
                    sync_signature: signature,
                    status: SnapshotStatus::Ok,
                    resources: snapshots.len(),
                    bytes: bytes.len(),
                },
                Err(err) => {
                    tracing::warn!(sync_signature = %signature, "{}", err);
                    SnapshotEntry {
                        sync_signature: signature,
                        status: SnapshotStatus::Corrupt,
                        resources: 0,
                        bytes: bytes.len(),
                    }
                }
            },
        };
        entries.push(entry);
    }

    if json {
        let summary = InspectSummary {
            aggregation_key: aggregator.aggregation_key(),
            snapshots: &entries,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} snapshots indexed under {}",
        entries.len(),
        aggregator.aggregation_key()
    );
    for entry in &entries {
        match entry.status {
            SnapshotStatus::Ok => println!(
                "- {}: {} resources ({} bytes)",
                entry.sync_signature, entry.resources, entry.bytes
            ),
            SnapshotStatus::Missing => println!("- {}: missing", entry.sync_signature),
            SnapshotStatus::Corrupt => println!("- {}: corrupt", entry.sync_signature),
        }
    }

    Ok(())
}
