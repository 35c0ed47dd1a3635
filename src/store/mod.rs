//! Record storage.
//!
//! [`RecordStore`] is the query and write interface the engine needs from the
//! authoritative datastore. [`MemoryStore`] is the in-process implementation
//! the daemon runs on, optionally persisted to a JSON file.
//!
//! Rows are stored revisions. Several rows may share one [`RecordIdentity`]
//! (draft and published copies of the same logical record).

pub mod lifecycle;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lifecycle::{HookOutcome, LifecycleHook, PendingWrite, Repository, WriteError, WriteKind};
pub use memory::MemoryStore;

/// Field values of a row.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Row not found: {record_type} #{row_id}")]
    RowNotFound { record_type: String, row_id: RowId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist store: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Logical identity shared by every stored revision of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordIdentity(String);

impl RecordIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identity for a record created without one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Storage row identity. Unique across all record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub row_id: RowId,
    pub record_type: String,
    pub identity: RecordIdentity,
    #[serde(default)]
    pub data: FieldMap,
}

impl StoredRecord {
    /// The row's value for `field`, as text.
    pub fn identifier(&self, field: &str) -> Option<String> {
        identifier_value(self.data.get(field))
    }
}

/// A monitored field's value on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub row_id: RowId,
    pub identity: RecordIdentity,
    pub value: Option<String>,
}

/// Read a JSON field as identifier text.
///
/// `null` and missing are `None`; non-string JSON is rendered so it can be
/// classified as malformed rather than silently ignored.
pub fn identifier_value(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Missing or whitespace-only.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Query and write interface over stored records.
///
/// Listing methods return rows in ascending [`RowId`] order so scans are
/// deterministic.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows of `record_type` whose `field` equals `value`.
    async fn find_by_value(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredRecord>>;

    /// Every row's value for one field.
    async fn scan_field(&self, record_type: &str, field: &str) -> Result<Vec<FieldEntry>>;

    /// All revisions sharing one identity.
    async fn find_by_identity(
        &self,
        record_type: &str,
        identity: &RecordIdentity,
    ) -> Result<Vec<StoredRecord>>;

    async fn get(&self, record_type: &str, row_id: RowId) -> Result<Option<StoredRecord>>;

    /// Store a new row.
    async fn insert(
        &self,
        record_type: &str,
        identity: RecordIdentity,
        data: FieldMap,
    ) -> Result<StoredRecord>;

    /// Merge `patch` into an existing row.
    async fn update(&self, record_type: &str, row_id: RowId, patch: FieldMap) -> Result<StoredRecord>;

    /// Overwrite a single field on one row.
    async fn set_field(&self, record_type: &str, row_id: RowId, field: &str, value: &str) -> Result<()>;
}
