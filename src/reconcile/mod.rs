//! Bulk scan-and-repair over monitored fields.
//!
//! Every operation walks the monitored fields in registry order and reads
//! each field with a single [`RecordStore::scan_field`] call. Rows are grouped
//! by (record identity, value) so revisions of one record are diagnosed and
//! repaired together.
//!
//! A fix run decides every change before touching the store for that group,
//! and values handed out during the run are reserved so that a dry run and a
//! live run from the same starting state log the same changes.

mod report;
mod scan;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use report::{
    ChangeEntry, ChangeReason, DiagnosisReport, DuplicateGroup, FieldDiagnosis, FieldStatus,
    FixCounts, FixOptions, MigrationStatus, ReconciliationResult, RecordError, Stats,
};

use crate::guard::Allocator;
use crate::registry::{FieldRegistry, MonitoredField};
use crate::store::{FieldMap, RecordStore, RowId, StoreError};
use scan::{FieldScan, RowGroup};

/// Diagnoses and repairs identifier state across stored records.
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<FieldRegistry>,
    store: Arc<dyn RecordStore>,
    allocator: Allocator,
}

impl Reconciler {
    pub fn new(registry: Arc<FieldRegistry>, store: Arc<dyn RecordStore>, allocator: Allocator) -> Self {
        Self {
            registry,
            store,
            allocator,
        }
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    async fn scan(&self, field: &MonitoredField) -> Result<FieldScan, StoreError> {
        let entries = self.store.scan_field(&field.record_type, &field.field).await?;
        Ok(FieldScan::from_entries(entries))
    }

    /// Report values shared by two or more record identities. Read-only.
    pub async fn diagnose(&self) -> Result<DiagnosisReport, StoreError> {
        let mut report = DiagnosisReport::default();

        for field in self.registry.fields() {
            let scan = self.scan(field).await?;

            let duplicates: Vec<DuplicateGroup> = scan
                .duplicate_sets(|_| false)
                .into_iter()
                .map(|set| DuplicateGroup {
                    value: set.value,
                    record_identities: set
                        .members
                        .iter()
                        .map(|&i| scan.groups[i].identity.clone())
                        .collect(),
                })
                .collect();

            if !duplicates.is_empty() {
                warn!(
                    record_type = %field.record_type,
                    field = %field.field,
                    groups = duplicates.len(),
                    "Duplicate values found"
                );
            }

            report.total_duplicate_groups += duplicates.len();
            report.fields.push(FieldDiagnosis {
                record_type: field.record_type.clone(),
                field: field.field.clone(),
                duplicate_count: duplicates.len(),
                duplicates,
            });
        }

        Ok(report)
    }

    /// Repair the selected categories.
    ///
    /// Empty and invalid values are handled first. Within each duplicate
    /// group the first identity in scan order keeps its value and every
    /// other identity is reassigned. Write failures are recorded per record
    /// and the run continues. A field that cannot be scanned ends the run
    /// with an error; repairs already made to earlier fields stay.
    pub async fn fix(&self, options: FixOptions) -> Result<ReconciliationResult, StoreError> {
        let mut result = ReconciliationResult {
            dry_run: options.dry_run,
            ..Default::default()
        };

        info!(
            dry_run = options.dry_run,
            fix_empty = options.fix_empty,
            fix_invalid = options.fix_invalid,
            fix_duplicates = options.fix_duplicates,
            "Starting reconciliation"
        );

        for field in self.registry.fields() {
            let scan = match self.scan(field).await {
                Ok(scan) => scan,
                Err(e) => {
                    error!(
                        record_type = %field.record_type,
                        field = %field.field,
                        error = %e,
                        changes = result.changes.len(),
                        "Reconciliation aborted, failed to scan field"
                    );
                    return Err(e);
                }
            };
            result.scanned += scan.rows;
            self.fix_field(field, &scan, options, &mut result).await;
        }

        info!(
            dry_run = result.dry_run,
            scanned = result.scanned,
            empty = result.fixed.empty,
            invalid = result.fixed.invalid,
            duplicates = result.fixed.duplicates,
            errors = result.errors.len(),
            "Reconciliation finished"
        );

        Ok(result)
    }

    async fn fix_field(
        &self,
        field: &MonitoredField,
        scan: &FieldScan,
        options: FixOptions,
        result: &mut ReconciliationResult,
    ) {
        let mut reserved: HashSet<String> = HashSet::new();
        let mut handled = vec![false; scan.groups.len()];

        for (i, group) in scan.groups.iter().enumerate() {
            let reason = if group.is_empty() {
                options.fix_empty.then_some(ChangeReason::Empty)
            } else if group.value.as_deref().is_some_and(|v| !field.is_valid(v)) {
                options.fix_invalid.then_some(ChangeReason::Invalid)
            } else {
                None
            };

            if let Some(reason) = reason {
                handled[i] = true;
                self.reassign(field, group, reason, options.dry_run, &mut reserved, result)
                    .await;
            }
        }

        if !options.fix_duplicates {
            return;
        }

        for set in scan.duplicate_sets(|i| handled[i]) {
            debug!(
                record_type = %field.record_type,
                field = %field.field,
                value = %set.value,
                keeper = %scan.groups[set.members[0]].identity,
                members = set.members.len(),
                "Resolving duplicate group"
            );
            for &i in &set.members[1..] {
                self.reassign(
                    field,
                    &scan.groups[i],
                    ChangeReason::Duplicate,
                    options.dry_run,
                    &mut reserved,
                    result,
                )
                .await;
            }
        }
    }

    /// Give every row of `group` a fresh value.
    async fn reassign(
        &self,
        field: &MonitoredField,
        group: &RowGroup,
        reason: ChangeReason,
        dry_run: bool,
        reserved: &mut HashSet<String>,
        result: &mut ReconciliationResult,
    ) {
        let fresh = match self.allocator.allocate(field, reserved).await {
            Ok(fresh) => fresh,
            Err(e) => {
                result.errors.push(record_error(field, group, &e));
                return;
            }
        };
        reserved.insert(fresh.clone());

        if !dry_run {
            if let Err(e) = self.write_group(field, group, &fresh).await {
                result.errors.push(record_error(field, group, &e));
                return;
            }
        }

        debug!(
            record_type = %field.record_type,
            field = %field.field,
            record_identity = %group.identity,
            old_value = ?group.value,
            new_value = %fresh,
            ?reason,
            dry_run,
            "Reassigned value"
        );

        match reason {
            ChangeReason::Empty => result.fixed.empty += 1,
            ChangeReason::Invalid => result.fixed.invalid += 1,
            ChangeReason::Duplicate => result.fixed.duplicates += 1,
            ChangeReason::Import => {}
        }
        result.changes.push(ChangeEntry {
            record_type: field.record_type.clone(),
            record_identity: group.identity.clone(),
            field: field.field.clone(),
            old_value: group.value.clone(),
            new_value: fresh,
            reason,
        });
    }

    /// Write `value` to every row of `group`.
    ///
    /// If a row fails, rows already written get their previous value back so
    /// the record is never left split across two values.
    async fn write_group(&self, field: &MonitoredField, group: &RowGroup, value: &str) -> Result<(), GroupWriteError> {
        let mut previous = Vec::with_capacity(group.rows.len());
        for &row_id in &group.rows {
            let raw = self
                .store
                .get(&field.record_type, row_id)
                .await
                .map_err(|source| GroupWriteError::Write {
                    row_id,
                    restored: 0,
                    source,
                })?
                .and_then(|row| row.data.get(&field.field).cloned())
                .unwrap_or(serde_json::Value::Null);
            previous.push((row_id, raw));
        }

        for (written, &(row_id, _)) in previous.iter().enumerate() {
            let Err(source) = self
                .store
                .set_field(&field.record_type, row_id, &field.field, value)
                .await
            else {
                continue;
            };

            for (restore_row, raw) in &previous[..written] {
                let patch = FieldMap::from([(field.field.clone(), raw.clone())]);
                if let Err(restore) = self.store.update(&field.record_type, *restore_row, patch).await {
                    return Err(GroupWriteError::Partial {
                        row_id,
                        written,
                        total: previous.len(),
                        restore,
                        source,
                    });
                }
            }
            if written > 0 {
                debug!(
                    record_type = %field.record_type,
                    record_identity = %group.identity,
                    restored = written,
                    "Restored rows after failed write"
                );
            }
            return Err(GroupWriteError::Write {
                row_id,
                restored: written,
                source,
            });
        }

        Ok(())
    }

    /// Per-field issue counts and whether any repair is needed.
    pub async fn status(&self) -> Result<MigrationStatus, StoreError> {
        let mut status = MigrationStatus::default();

        for field in self.registry.fields() {
            let scan = self.scan(field).await?;

            let entry = FieldStatus {
                record_type: field.record_type.clone(),
                field: field.field.clone(),
                rows: scan.rows,
                empty: scan.empty_count(),
                invalid: scan.invalid_count(field),
                duplicate_groups: scan.duplicate_sets(|_| false).len(),
            };
            status.needs_migration |= entry.has_issues();
            status.fields.push(entry);
        }

        Ok(status)
    }

    /// Aggregate counts across every model.
    pub async fn stats(&self) -> Result<Stats, StoreError> {
        let status = self.status().await?;

        let mut stats = Stats {
            models: self.registry.record_types().len(),
            fields: self.registry.len(),
            ..Default::default()
        };
        for field in &status.fields {
            stats.rows += field.rows;
            stats.empty += field.empty;
            stats.invalid += field.invalid;
            stats.duplicate_groups += field.duplicate_groups;
        }

        Ok(stats)
    }
}

/// A group write that did not reach every row.
#[derive(Error, Debug)]
enum GroupWriteError {
    #[error("Write to row {row_id} failed, {restored} earlier rows restored: {source}")]
    Write {
        row_id: RowId,
        restored: usize,
        source: StoreError,
    },

    #[error("Write to row {row_id} failed after {written} of {total} rows were written, and restoring them failed ({restore}): {source}")]
    Partial {
        row_id: RowId,
        written: usize,
        total: usize,
        restore: StoreError,
        source: StoreError,
    },
}

fn record_error(field: &MonitoredField, group: &RowGroup, error: &dyn std::error::Error) -> RecordError {
    warn!(
        record_type = %field.record_type,
        field = %field.field,
        record_identity = %group.identity,
        error = %error,
        "Failed to repair record"
    );
    RecordError {
        record_type: field.record_type.clone(),
        field: field.field.clone(),
        record_identity: Some(group.identity.clone()),
        error: error.to_string(),
    }
}
