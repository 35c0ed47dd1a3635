//! Export and import of identifier mappings.
//!
//! An export is a point-in-time copy of every monitored value keyed by
//! record identity. Importing re-applies such a copy to the current store,
//! typically after records were moved between environments.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::oracle::UniquenessOracle;
use crate::reconcile::{ChangeEntry, ChangeReason, RecordError};
use crate::registry::FieldRegistry;
use crate::store::{is_blank, RecordIdentity, RecordStore, StoreError};

/// Format tag written into every export.
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found}, expected {SNAPSHOT_FORMAT_VERSION}")]
    UnsupportedVersion { found: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub record_identity: RecordIdentity,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMappings {
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<MappingEntry>>,
}

/// Record type to field to entries.
pub type Mappings = BTreeMap<String, ModelMappings>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub mappings: Mappings,
}

impl ExportSnapshot {
    /// Parse an export file, refusing unknown format versions.
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(text)?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    /// Number of entries across all fields.
    pub fn entry_count(&self) -> usize {
        self.mappings
            .values()
            .flat_map(|m| m.fields.values())
            .map(Vec::len)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub dry_run: bool,
    /// Replace values that are already set.
    pub overwrite: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub dry_run: bool,
    pub imported: usize,
    pub skipped: usize,
    pub changes: Vec<ChangeEntry>,
    pub errors: Vec<RecordError>,
}

/// Export and import over the monitored fields.
#[derive(Clone)]
pub struct Snapshots {
    registry: Arc<FieldRegistry>,
    store: Arc<dyn RecordStore>,
    oracle: UniquenessOracle,
}

impl Snapshots {
    pub fn new(registry: Arc<FieldRegistry>, store: Arc<dyn RecordStore>, oracle: UniquenessOracle) -> Self {
        Self {
            registry,
            store,
            oracle,
        }
    }

    /// One entry per (identity, value) for every monitored field.
    pub async fn export(&self) -> Result<ExportSnapshot> {
        let mut mappings = Mappings::new();

        for field in self.registry.fields() {
            let entries = self.store.scan_field(&field.record_type, &field.field).await?;

            let mut seen = HashSet::new();
            let list: Vec<MappingEntry> = entries
                .into_iter()
                .filter(|e| seen.insert((e.identity.clone(), e.value.clone())))
                .map(|e| MappingEntry {
                    record_identity: e.identity,
                    value: e.value,
                })
                .collect();

            mappings
                .entry(field.record_type.clone())
                .or_default()
                .fields
                .insert(field.field.clone(), list);
        }

        let snapshot = ExportSnapshot {
            exported_at: Utc::now(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            mappings,
        };
        info!(entries = snapshot.entry_count(), "Exported identifier mappings");
        Ok(snapshot)
    }

    /// Apply `mappings` to the current records.
    ///
    /// Entries are skipped when blank, already current, or (without
    /// `overwrite`) when the record already holds a value. Entries for
    /// unmonitored fields, malformed values, unknown identities, and values
    /// held by another record are reported as errors. A failed entry does not
    /// stop the run. Later entries see the values earlier entries gave out,
    /// in a dry run as well as a live one.
    pub async fn import(&self, mappings: &Mappings, options: ImportOptions) -> ImportResult {
        let mut result = ImportResult {
            dry_run: options.dry_run,
            ..Default::default()
        };

        for (record_type, model) in mappings {
            for (field_name, entries) in &model.fields {
                let Some(field) = self.registry.get(record_type, field_name) else {
                    result.errors.push(import_error(
                        record_type,
                        field_name,
                        None,
                        "field is not monitored".to_string(),
                    ));
                    continue;
                };

                // Values claimed earlier in this import, and the value each
                // identity was given. Together they stand in for the writes a
                // dry run skips, so both modes see the same store.
                let mut staged: HashMap<String, RecordIdentity> = HashMap::new();
                let mut assigned: HashMap<RecordIdentity, String> = HashMap::new();

                for entry in entries {
                    let identity = &entry.record_identity;
                    let Some(value) = entry.value.as_deref().filter(|v| !is_blank(Some(*v))) else {
                        result.skipped += 1;
                        continue;
                    };

                    if !field.is_valid(value) {
                        result.errors.push(import_error(
                            record_type,
                            field_name,
                            Some(identity),
                            format!("invalid value {value:?}"),
                        ));
                        continue;
                    }

                    let rows = match self.store.find_by_identity(record_type, identity).await {
                        Ok(rows) if rows.is_empty() => {
                            result.errors.push(import_error(
                                record_type,
                                field_name,
                                Some(identity),
                                "record not found".to_string(),
                            ));
                            continue;
                        }
                        Ok(rows) => rows,
                        Err(e) => {
                            result.errors.push(import_error(record_type, field_name, Some(identity), e.to_string()));
                            continue;
                        }
                    };

                    let (current, up_to_date) = match assigned.get(identity) {
                        Some(earlier) => (Some(earlier.clone()), earlier == value),
                        None => (
                            rows.iter()
                                .find_map(|r| r.identifier(field_name).filter(|v| !is_blank(Some(v.as_str())))),
                            rows.iter().all(|r| r.identifier(field_name).as_deref() == Some(value)),
                        ),
                    };
                    if up_to_date {
                        result.skipped += 1;
                        continue;
                    }
                    if current.is_some() && !options.overwrite {
                        debug!(
                            record_type = %record_type,
                            field = %field_name,
                            record_identity = %identity,
                            "Keeping existing value"
                        );
                        result.skipped += 1;
                        continue;
                    }

                    if let Some(holder) = staged.get(value).filter(|h| *h != identity) {
                        result.errors.push(import_error(
                            record_type,
                            field_name,
                            Some(identity),
                            format!("value also mapped to record {holder} in this import"),
                        ));
                        continue;
                    }
                    // Holders moved off this value earlier in the import no longer count.
                    match self.oracle.owners(record_type, field_name, value).await {
                        Ok(owners) => {
                            let owner = owners.into_iter().find(|owner| {
                                owner != identity && assigned.get(owner).map_or(true, |v| v == value)
                            });
                            if let Some(owner) = owner {
                                result.errors.push(import_error(
                                    record_type,
                                    field_name,
                                    Some(identity),
                                    format!("value already assigned to record {owner}"),
                                ));
                                continue;
                            }
                        }
                        Err(e) => {
                            result.errors.push(import_error(record_type, field_name, Some(identity), e.to_string()));
                            continue;
                        }
                    }

                    if !options.dry_run {
                        let mut failed = None;
                        for row in &rows {
                            if let Err(e) = self.store.set_field(record_type, row.row_id, field_name, value).await {
                                failed = Some(e);
                                break;
                            }
                        }
                        if let Some(e) = failed {
                            result.errors.push(import_error(record_type, field_name, Some(identity), e.to_string()));
                            continue;
                        }
                    }

                    if let Some(previous) = assigned.insert(identity.clone(), value.to_string()) {
                        staged.remove(&previous);
                    }
                    staged.insert(value.to_string(), identity.clone());
                    result.imported += 1;
                    result.changes.push(ChangeEntry {
                        record_type: record_type.clone(),
                        record_identity: identity.clone(),
                        field: field_name.clone(),
                        old_value: current,
                        new_value: value.to_string(),
                        reason: ChangeReason::Import,
                    });
                }
            }
        }

        info!(
            dry_run = result.dry_run,
            imported = result.imported,
            skipped = result.skipped,
            errors = result.errors.len(),
            "Imported identifier mappings"
        );
        result
    }
}

fn import_error(
    record_type: &str,
    field: &str,
    identity: Option<&RecordIdentity>,
    error: String,
) -> RecordError {
    warn!(
        record_type = %record_type,
        field = %field,
        record_identity = ?identity,
        error = %error,
        "Failed to import mapping"
    );
    RecordError {
        record_type: record_type.to_string(),
        field: field.to_string(),
        record_identity: identity.cloned(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MonitoredField;
    use crate::store::{FieldMap, MemoryStore};
    use serde_json::json;

    const TYPE: &str = "api::article.article";
    const VALID_A: &str = "3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23";
    const VALID_B: &str = "9a1c7d20-4e5f-4a6b-9c8d-0e1f2a3b4c5d";
    const VALID_C: &str = "0b6e2f4a-1c3d-4e5f-a7b8-9c0d1e2f3a4b";

    fn service(store: Arc<MemoryStore>) -> Snapshots {
        let registry = Arc::new(FieldRegistry::from_fields(vec![MonitoredField::new(TYPE, "uuid")]));
        let oracle = UniquenessOracle::new(store.clone(), true);
        Snapshots::new(registry, store, oracle)
    }

    async fn insert(store: &MemoryStore, identity: &str, value: serde_json::Value) {
        let data: FieldMap = serde_json::from_value(json!({ "uuid": value })).unwrap();
        store.insert(TYPE, identity.into(), data).await.unwrap();
    }

    fn mappings(entries: &[(&str, Option<&str>)]) -> Mappings {
        let list = entries
            .iter()
            .map(|(id, value)| MappingEntry {
                record_identity: (*id).into(),
                value: value.map(str::to_string),
            })
            .collect();
        let mut model = ModelMappings::default();
        model.fields.insert("uuid".to_string(), list);
        Mappings::from([(TYPE.to_string(), model)])
    }

    #[tokio::test]
    async fn test_export_then_import_is_noop() {
        let store = Arc::new(MemoryStore::new());
        insert(&store, "doc-a", json!(VALID_A)).await;
        insert(&store, "doc-a", json!(VALID_A)).await;
        insert(&store, "doc-b", json!(VALID_B)).await;
        let snapshots = service(store);

        let snapshot = snapshots.export().await.unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.entry_count(), 2);

        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.contains("exportedAt"));
        assert!(text.contains("recordIdentity"));
        let parsed = ExportSnapshot::from_json(&text).unwrap();
        assert_eq!(parsed, snapshot);

        let options = ImportOptions {
            dry_run: false,
            overwrite: false,
        };
        let result = snapshots.import(&parsed.mappings, options).await;
        assert_eq!(result.imported, 0);
        assert_eq!(result.skipped, 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_import_fills_and_overwrites() {
        let store = Arc::new(MemoryStore::new());
        insert(&store, "doc-a", json!(null)).await;
        insert(&store, "doc-b", json!(VALID_B)).await;
        let snapshots = service(store.clone());
        let incoming = mappings(&[("doc-a", Some(VALID_A)), ("doc-b", Some(VALID_C))]);

        let fill = ImportOptions {
            dry_run: false,
            overwrite: false,
        };
        let result = snapshots.import(&incoming, fill).await;
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.changes[0].old_value, None);

        let result = snapshots
            .import(&incoming, ImportOptions { dry_run: false, overwrite: true })
            .await;
        assert_eq!(result.imported, 1);
        assert_eq!(result.changes[0].old_value.as_deref(), Some(VALID_B));

        let rows = store.find_by_identity(TYPE, &"doc-b".into()).await.unwrap();
        assert_eq!(rows[0].identifier("uuid").as_deref(), Some(VALID_C));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        insert(&store, "doc-a", json!("")).await;
        let snapshots = service(store.clone());

        let result = snapshots
            .import(&mappings(&[("doc-a", Some(VALID_A))]), ImportOptions::default())
            .await;
        assert!(result.dry_run);
        assert_eq!(result.imported, 1);

        let rows = store.find_by_identity(TYPE, &"doc-a".into()).await.unwrap();
        assert_eq!(rows[0].identifier("uuid").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_import_errors_are_per_entry() {
        let store = Arc::new(MemoryStore::new());
        insert(&store, "doc-a", json!(VALID_A)).await;
        insert(&store, "doc-b", json!(null)).await;
        insert(&store, "doc-c", json!(null)).await;
        insert(&store, "doc-d", json!(null)).await;
        let snapshots = service(store);

        let mut incoming = mappings(&[
            ("doc-b", Some(VALID_A)),
            ("doc-c", Some("garbage")),
            ("ghost", Some(VALID_B)),
            ("doc-c", Some(VALID_C)),
            ("doc-d", Some(VALID_C)),
            ("doc-d", None),
        ]);
        incoming
            .get_mut(TYPE)
            .unwrap()
            .fields
            .insert("title".to_string(), vec![]);

        let options = ImportOptions {
            dry_run: true,
            overwrite: false,
        };
        let result = snapshots.import(&incoming, options).await;

        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
        let reasons: Vec<&str> = result.errors.iter().map(|e| e.error.as_str()).collect();
        assert_eq!(result.errors.len(), 5, "{reasons:?}");
        assert!(reasons.iter().any(|r| r.contains("doc-a")));
        assert!(reasons.iter().any(|r| r.contains("invalid value")));
        assert!(reasons.iter().any(|r| r.contains("record not found")));
        assert!(reasons.iter().any(|r| r.contains("in this import")));
        assert!(reasons.iter().any(|r| r.contains("not monitored")));
    }

    #[tokio::test]
    async fn test_dry_run_matches_live_import() {
        // doc-b moves off B so doc-a can take it, then doc-b takes doc-a's old value.
        let incoming = mappings(&[
            ("doc-b", Some(VALID_C)),
            ("doc-a", Some(VALID_B)),
            ("doc-b", Some(VALID_A)),
        ]);

        let mut outcomes = Vec::new();
        for dry_run in [true, false] {
            let store = Arc::new(MemoryStore::new());
            insert(&store, "doc-a", json!(VALID_A)).await;
            insert(&store, "doc-b", json!(VALID_B)).await;
            insert(&store, "doc-b", json!(VALID_B)).await;
            let snapshots = service(store.clone());

            let result = snapshots
                .import(&incoming, ImportOptions { dry_run, overwrite: true })
                .await;
            assert!(result.errors.is_empty(), "{:?}", result.errors);
            assert_eq!(result.imported, 3);
            outcomes.push((result.changes, store));
        }

        let (live_changes, live_store) = outcomes.pop().unwrap();
        let (dry_changes, _) = outcomes.pop().unwrap();
        assert_eq!(dry_changes, live_changes);
        assert_eq!(live_changes[2].old_value.as_deref(), Some(VALID_C));

        let doc_a = live_store.find_by_identity(TYPE, &"doc-a".into()).await.unwrap();
        assert_eq!(doc_a[0].identifier("uuid").as_deref(), Some(VALID_B));
        let doc_b = live_store.find_by_identity(TYPE, &"doc-b".into()).await.unwrap();
        assert!(doc_b.iter().all(|r| r.identifier("uuid").as_deref() == Some(VALID_A)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let text = r#"{ "exportedAt": "2024-01-01T00:00:00Z", "version": "2.0", "mappings": {} }"#;
        assert!(matches!(
            ExportSnapshot::from_json(text),
            Err(SnapshotError::UnsupportedVersion { .. })
        ));
        assert!(matches!(ExportSnapshot::from_json("{"), Err(SnapshotError::Malformed(_))));
    }
}
