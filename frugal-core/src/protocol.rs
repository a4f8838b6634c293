//! Missing-attribute protocol
//!
//! Drives a tracked record through its load states when the host reports a
//! read of a column the record does not hold. The first such read reloads
//! every column the record is missing, exactly once. Every column read
//! outside the record's own set is fed back into its callsite, so later
//! queries from the same signature fetch it up front.

use crate::error::FrugalError;
use crate::metrics::OptimizerMetrics;
use crate::orm::{OrmAdapter, TrackedRecord};
use crate::query::QueryContext;
use crate::record::{ColumnAccess, LoadState, RecordTracking};
use crate::registry::CallsiteRegistry;
use frugal_types::EntityType;

/// Escalation and feedback for records loaded through `A`
pub struct MissingAttributeProtocol<'a, A: OrmAdapter> {
    adapter: &'a A,
    registry: &'a CallsiteRegistry,
    metrics: &'a OptimizerMetrics,
}

impl<'a, A: OrmAdapter> MissingAttributeProtocol<'a, A> {
    pub fn new(adapter: &'a A, registry: &'a CallsiteRegistry, metrics: &'a OptimizerMetrics) -> Self {
        MissingAttributeProtocol {
            adapter,
            registry,
            metrics,
        }
    }

    /// Handle a read of `column` on `record`.
    ///
    /// `Partial` records are escalated with one reload. `Complete` records
    /// only learn the column. A read while the reload is in flight returns
    /// `ColumnAccess::Pending` without side effects.
    pub fn on_column_miss(
        &self,
        record: &mut A::Record,
        column: &str,
    ) -> Result<ColumnAccess, FrugalError<A::Error>> {
        let (entity, state) = match record.tracking() {
            Some(tracking) if tracking.is_enabled() => {
                if tracking.has_column(column) {
                    return Ok(ColumnAccess::Present);
                }
                (tracking.entity().clone(), tracking.state())
            }
            _ => return Ok(ColumnAccess::Untracked),
        };

        let declared = self.adapter.column_names(&entity);
        if !declared.iter().any(|c| c == column) {
            return Ok(ColumnAccess::NotAColumn);
        }

        let access = match state {
            LoadState::Escalating => return Ok(ColumnAccess::Pending),
            LoadState::Partial => {
                self.escalate(record, &entity, &declared)?;
                ColumnAccess::Escalated
            }
            LoadState::Complete => ColumnAccess::Learned,
        };

        if let Some(tracking) = record.tracking_mut() {
            self.learn_column(tracking, column);
        }
        Ok(access)
    }

    /// Record that `association` was used on `record`.
    ///
    /// Each association is reported to the callsite at most once per
    /// record. Returns true if the callsite learned something new.
    pub fn on_association(&self, record: &mut A::Record, association: &str) -> bool {
        let Some(tracking) = record.tracking_mut().filter(|t| t.is_enabled()) else {
            return false;
        };
        if !tracking.mark_association_seen(association) {
            return false;
        }

        if let Some(resource) = tracking.resource() {
            resource.add_association(tracking.entity(), association);
        }

        let callsite = self.registry.resolve(tracking.entity(), tracking.signature());
        let learned = callsite.add_association(association);
        if learned {
            self.metrics.record_learned_association();
            tracing::debug!(
                entity = %tracking.entity(),
                signature = %tracking.signature(),
                association,
                "association learned"
            );
        }
        learned
    }

    /// Mark an in-memory assignment so escalation never overwrites it
    pub fn assign_column(&self, record: &mut A::Record, column: &str) {
        if let Some(tracking) = record.tracking_mut().filter(|t| t.is_enabled()) {
            tracking.mark_assigned(column);
        }
    }

    /// Fully materialize `record` ahead of a delete, destroy or dump.
    ///
    /// Reloads if the record is still `Partial`, then claims every declared
    /// column as held.
    pub fn complete(&self, record: &mut A::Record) -> Result<(), FrugalError<A::Error>> {
        let (entity, state) = match record.tracking() {
            Some(tracking) if tracking.is_enabled() => {
                (tracking.entity().clone(), tracking.state())
            }
            _ => return Ok(()),
        };

        let declared = self.adapter.column_names(&entity);
        if state == LoadState::Partial {
            self.escalate(record, &entity, &declared)?;
        }
        if let Some(tracking) = record.tracking_mut() {
            tracking.absorb_all(&declared);
        }
        Ok(())
    }

    /// Reload every declared column the record does not already hold
    fn escalate(
        &self,
        record: &mut A::Record,
        entity: &EntityType,
        declared: &[String],
    ) -> Result<(), FrugalError<A::Error>> {
        let Some(tracking) = record.tracking_mut() else {
            return Ok(());
        };
        let saved = tracking.snapshot();
        let missing = tracking.missing_columns(declared);
        let mut ctx = QueryContext::passthrough(entity.clone(), tracking.resource().cloned());
        ctx.columns = missing.iter().cloned().collect();
        tracking.begin_escalation();

        tracing::debug!(
            entity = %entity,
            signature = %tracking.signature(),
            columns = missing.len(),
            "escalating to full reload"
        );

        if let Err(source) = self.adapter.reload(record, &missing, &ctx) {
            if let Some(tracking) = record.tracking_mut() {
                tracking.restore(saved);
            }
            return Err(FrugalError::Reload {
                entity: entity.clone(),
                source,
            });
        }

        if let Some(tracking) = record.tracking_mut() {
            tracking.finish_escalation();
        }
        self.metrics.record_escalation();
        Ok(())
    }

    fn learn_column(&self, tracking: &mut RecordTracking, column: &str) {
        tracking.mark_assigned(column);

        if let Some(resource) = tracking.resource() {
            resource.add_column(tracking.entity(), column);
        }

        let callsite = self.registry.resolve(tracking.entity(), tracking.signature());
        if callsite.add_column(column) {
            self.metrics.record_learned_column();
            tracing::debug!(
                entity = %tracking.entity(),
                signature = %tracking.signature(),
                column,
                "column learned"
            );
        }
    }
}

/// Run a mutating operation on `record`, restoring its tracking state if
/// the operation fails
pub fn with_rollback<R, T, E>(
    record: &mut R,
    op: impl FnOnce(&mut R) -> Result<T, E>,
) -> Result<T, E>
where
    R: TrackedRecord,
{
    let saved = record.tracking().map(RecordTracking::snapshot);
    let result = op(record);
    if result.is_err() {
        if let (Some(saved), Some(tracking)) = (saved, record.tracking_mut()) {
            tracking.restore(saved);
        }
    }
    result
}
