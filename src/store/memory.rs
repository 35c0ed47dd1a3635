//! In-process record store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{FieldEntry, FieldMap, RecordIdentity, RecordStore, Result, RowId, StoreError, StoredRecord};

#[derive(Debug, Default)]
struct State {
    next_row: u64,
    rows: BTreeMap<RowId, StoredRecord>,
}

/// On-disk form.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Persisted {
    next_row: u64,
    records: Vec<StoredRecord>,
}

/// Record store held in memory.
///
/// When opened with a path, every write rewrites the file atomically
/// (temp file in the same directory, then rename).
pub struct MemoryStore {
    state: RwLock<State>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty store with no persistence.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading existing rows if the file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let mut state = State::default();

        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let persisted: Persisted = serde_json::from_str(&text)?;
            let max_row = persisted.records.iter().map(|r| r.row_id.0).max().unwrap_or(0);
            state.next_row = persisted.next_row.max(max_row);
            state.rows = persisted
                .records
                .into_iter()
                .map(|r| (r.row_id, r))
                .collect();
            info!(path = %path.display(), rows = state.rows.len(), "Loaded record store");
        } else {
            info!(path = %path.display(), "Starting empty record store");
        }

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    /// Number of stored rows across all record types.
    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn persist(&self, state: &State) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let persisted = Persisted {
            next_row: state.next_row,
            records: state.rows.values().cloned().collect(),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &persisted)?;
        tmp.flush()?;
        tmp.persist(path)?;

        debug!(path = %path.display(), rows = persisted.records.len(), "Persisted record store");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_value(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredRecord>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .filter(|r| r.record_type == record_type)
            .filter(|r| r.identifier(field).as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn scan_field(&self, record_type: &str, field: &str) -> Result<Vec<FieldEntry>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .filter(|r| r.record_type == record_type)
            .map(|r| FieldEntry {
                row_id: r.row_id,
                identity: r.identity.clone(),
                value: r.identifier(field),
            })
            .collect())
    }

    async fn find_by_identity(
        &self,
        record_type: &str,
        identity: &RecordIdentity,
    ) -> Result<Vec<StoredRecord>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .filter(|r| r.record_type == record_type && &r.identity == identity)
            .cloned()
            .collect())
    }

    async fn get(&self, record_type: &str, row_id: RowId) -> Result<Option<StoredRecord>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .get(&row_id)
            .filter(|r| r.record_type == record_type)
            .cloned())
    }

    async fn insert(
        &self,
        record_type: &str,
        identity: RecordIdentity,
        data: FieldMap,
    ) -> Result<StoredRecord> {
        let mut state = self.state.write().await;
        state.next_row += 1;
        let record = StoredRecord {
            row_id: RowId(state.next_row),
            record_type: record_type.to_string(),
            identity,
            data,
        };
        state.rows.insert(record.row_id, record.clone());

        if let Err(e) = self.persist(&state) {
            state.rows.remove(&record.row_id);
            state.next_row -= 1;
            return Err(e);
        }
        Ok(record)
    }

    async fn update(&self, record_type: &str, row_id: RowId, patch: FieldMap) -> Result<StoredRecord> {
        let mut state = self.state.write().await;
        let record = state
            .rows
            .get_mut(&row_id)
            .filter(|r| r.record_type == record_type)
            .ok_or_else(|| StoreError::RowNotFound {
                record_type: record_type.to_string(),
                row_id,
            })?;
        let previous = record.data.clone();
        record.data.extend(patch);
        let updated = record.clone();

        if let Err(e) = self.persist(&state) {
            if let Some(record) = state.rows.get_mut(&row_id) {
                record.data = previous;
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn set_field(&self, record_type: &str, row_id: RowId, field: &str, value: &str) -> Result<()> {
        let mut patch = FieldMap::new();
        patch.insert(field.to_string(), serde_json::Value::String(value.to_string()));
        self.update(record_type, row_id, patch).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{identifier_value, is_blank};
    use serde_json::json;
    use tempfile::tempdir;

    fn data(value: serde_json::Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookups() {
        let store = MemoryStore::new();
        let a = store
            .insert("article", "doc-a".into(), data(json!({ "uuid": "x" })))
            .await
            .unwrap();
        store
            .insert("article", "doc-a".into(), data(json!({ "uuid": "x" })))
            .await
            .unwrap();
        store
            .insert("tag", "doc-t".into(), data(json!({ "uuid": "x" })))
            .await
            .unwrap();

        assert_eq!(a.row_id, RowId(1));
        assert_eq!(store.find_by_value("article", "uuid", "x").await.unwrap().len(), 2);
        assert_eq!(store.find_by_identity("article", &"doc-a".into()).await.unwrap().len(), 2);
        assert!(store.get("tag", a.row_id).await.unwrap().is_none());

        let scan = store.scan_field("article", "uuid").await.unwrap();
        assert_eq!(scan.len(), 2);
        assert!(scan[0].row_id < scan[1].row_id);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let store = MemoryStore::new();
        let row = store
            .insert("article", "doc-a".into(), data(json!({ "title": "t", "uuid": "x" })))
            .await
            .unwrap();

        let updated = store
            .update("article", row.row_id, data(json!({ "title": "u" })))
            .await
            .unwrap();
        assert_eq!(updated.identifier("uuid").as_deref(), Some("x"));
        assert_eq!(updated.data["title"], json!("u"));

        let missing = store.update("article", RowId(99), FieldMap::new()).await;
        assert!(matches!(missing, Err(StoreError::RowNotFound { .. })));
    }

    #[tokio::test]
    async fn test_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");

        {
            let store = MemoryStore::open(&path).unwrap();
            let row = store
                .insert("article", "doc-a".into(), data(json!({ "uuid": null })))
                .await
                .unwrap();
            store.set_field("article", row.row_id, "uuid", "v").await.unwrap();
        }

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.len().await, 1);
        let rows = reopened.find_by_value("article", "uuid", "v").await.unwrap();
        assert_eq!(rows.len(), 1);

        let next = reopened
            .insert("article", "doc-b".into(), FieldMap::new())
            .await
            .unwrap();
        assert_eq!(next.row_id, RowId(2));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = MemoryStore::open(&data_dir.join("records.json")).unwrap();
        let row = store
            .insert("article", "doc-a".into(), data(json!({ "uuid": "x" })))
            .await
            .unwrap();

        // The data directory becomes a plain file, so every persist fails.
        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, "not a directory").unwrap();

        let inserted = store
            .insert("article", "doc-b".into(), data(json!({ "uuid": "y" })))
            .await;
        assert!(inserted.is_err());
        assert_eq!(store.len().await, 1);
        assert!(store.find_by_value("article", "uuid", "y").await.unwrap().is_empty());

        let updated = store.set_field("article", row.row_id, "uuid", "z").await;
        assert!(updated.is_err());
        let current = store.get("article", row.row_id).await.unwrap().unwrap();
        assert_eq!(current.identifier("uuid").as_deref(), Some("x"));

        // Row numbering is unaffected by the failed insert.
        std::fs::remove_file(&data_dir).unwrap();
        let next = store.insert("article", "doc-c".into(), FieldMap::new()).await.unwrap();
        assert_eq!(next.row_id, RowId(2));
    }

    #[test]
    fn test_identifier_value_rendering() {
        assert_eq!(identifier_value(None), None);
        assert_eq!(identifier_value(Some(&json!(null))), None);
        assert_eq!(identifier_value(Some(&json!("a"))).as_deref(), Some("a"));
        assert_eq!(identifier_value(Some(&json!(12))).as_deref(), Some("12"));
        assert!(is_blank(Some("  ")));
        assert!(!is_blank(Some("a")));
    }
}
