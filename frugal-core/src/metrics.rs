//! Optimizer metrics
//!
//! Counters for how often queries were optimized or passed through and for
//! what the callsites learned along the way.

use crate::error::Bypass;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide optimizer counters
#[derive(Debug, Default)]
pub struct OptimizerMetrics {
    /// Queries rewritten from a callsite
    pub optimized: AtomicU64,

    /// Queries passed through untouched
    pub bypassed: AtomicU64,

    /// Optimized queries that failed and were retried unoptimized
    pub fallbacks: AtomicU64,

    /// Full reloads triggered by a column miss
    pub escalations: AtomicU64,

    pub learned_columns: AtomicU64,
    pub learned_associations: AtomicU64,
    pub syncs: AtomicU64,
    pub sync_failures: AtomicU64,
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_optimized(&self) {
        self.optimized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self, reason: Bypass) {
        tracing::debug!(reason = %reason, "query bypassed");
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_learned_column(&self) {
        self.learned_columns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_learned_association(&self) {
        self.learned_associations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync(&self, ok: bool) {
        if ok {
            self.syncs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sync_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.optimized,
            &self.bypassed,
            &self.fallbacks,
            &self.escalations,
            &self.learned_columns,
            &self.learned_associations,
            &self.syncs,
            &self.sync_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            optimized: self.optimized.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            learned_columns: self.learned_columns.load(Ordering::Relaxed),
            learned_associations: self.learned_associations.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of optimizer metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub optimized: u64,
    pub bypassed: u64,
    pub fallbacks: u64,
    pub escalations: u64,
    pub learned_columns: u64,
    pub learned_associations: u64,
    pub syncs: u64,
    pub sync_failures: u64,
}

impl MetricsSnapshot {
    /// Share of queries that were optimized (0.0 to 1.0)
    pub fn optimized_rate(&self) -> f64 {
        let total = self.optimized + self.bypassed;
        if total == 0 {
            0.0
        } else {
            self.optimized as f64 / total as f64
        }
    }

    /// Escalations per optimized query
    pub fn escalation_rate(&self) -> f64 {
        if self.optimized == 0 {
            0.0
        } else {
            self.escalations as f64 / self.optimized as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Optimizer:")?;
        writeln!(
            f,
            "  Optimized: {} | Bypassed: {} | Rate: {:.1}%",
            self.optimized,
            self.bypassed,
            self.optimized_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Escalations: {} | Fallbacks: {} | Escalation Rate: {:.1}%",
            self.escalations,
            self.fallbacks,
            self.escalation_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Learned: {} columns, {} associations",
            self.learned_columns, self.learned_associations
        )?;
        writeln!(
            f,
            "  Syncs: {} | Sync Failures: {}",
            self.syncs, self.sync_failures
        )?;
        Ok(())
    }
}
