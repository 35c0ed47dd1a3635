//! Reports produced by bulk operations. Never persisted.

use serde::{Deserialize, Serialize};

use crate::store::RecordIdentity;

/// One value shared by two or more distinct record identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub value: String,
    pub record_identities: Vec<RecordIdentity>,
}

/// Duplicate groups found for one monitored field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiagnosis {
    pub record_type: String,
    pub field: String,
    pub duplicate_count: usize,
    pub duplicates: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisReport {
    pub fields: Vec<FieldDiagnosis>,
    pub total_duplicate_groups: usize,
}

impl DiagnosisReport {
    pub fn for_field(&self, record_type: &str, field: &str) -> Option<&FieldDiagnosis> {
        self.fields
            .iter()
            .find(|f| f.record_type == record_type && f.field == field)
    }
}

/// A per-record failure recorded during a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub record_type: String,
    pub field: String,
    pub record_identity: Option<RecordIdentity>,
    pub error: String,
}

/// Why a value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    Empty,
    Invalid,
    Duplicate,
    Import,
}

/// One corrective write, logged whether or not it was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub record_type: String,
    pub record_identity: RecordIdentity,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub reason: ChangeReason,
}

/// Categories a fix run should repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixOptions {
    pub dry_run: bool,
    pub fix_empty: bool,
    pub fix_invalid: bool,
    pub fix_duplicates: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self::all(true)
    }
}

impl FixOptions {
    pub fn all(dry_run: bool) -> Self {
        Self {
            dry_run,
            fix_empty: true,
            fix_invalid: true,
            fix_duplicates: true,
        }
    }

    pub fn empty_only(dry_run: bool) -> Self {
        Self {
            dry_run,
            fix_empty: true,
            fix_invalid: false,
            fix_duplicates: false,
        }
    }

    pub fn duplicates_only(dry_run: bool) -> Self {
        Self {
            dry_run,
            fix_empty: false,
            fix_invalid: false,
            fix_duplicates: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixCounts {
    pub empty: usize,
    pub invalid: usize,
    pub duplicates: usize,
}

impl FixCounts {
    pub fn total(&self) -> usize {
        self.empty + self.invalid + self.duplicates
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub dry_run: bool,
    /// Rows examined across all monitored fields.
    pub scanned: usize,
    pub fixed: FixCounts,
    pub changes: Vec<ChangeEntry>,
    pub errors: Vec<RecordError>,
}

/// Issue counts for one monitored field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldStatus {
    pub record_type: String,
    pub field: String,
    /// Stored rows, every revision counted.
    pub rows: usize,
    pub empty: usize,
    pub invalid: usize,
    pub duplicate_groups: usize,
}

impl FieldStatus {
    pub fn has_issues(&self) -> bool {
        self.empty + self.invalid + self.duplicate_groups > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub needs_migration: bool,
    pub fields: Vec<FieldStatus>,
}

/// Aggregate counts across every model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub models: usize,
    pub fields: usize,
    /// Stored rows across monitored fields.
    pub rows: usize,
    pub empty: usize,
    pub invalid: usize,
    pub duplicate_groups: usize,
}
