//! Record lifecycle with pre-commit hooks.
//!
//! Every create and update issued through [`Repository`] is shown to the
//! registered [`LifecycleHook`]s before it reaches the store. A hook may
//! approve the payload, hand back a modified payload, or reject the write.
//! Hooks run in registration order; each sees the payload left by the
//! previous one.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{FieldMap, RecordIdentity, RecordStore, RowId, StoreError, StoredRecord};
use crate::guard::GuardError;

/// Kind of write being intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// A write waiting for hook approval.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub kind: WriteKind,
    pub record_type: String,

    /// Target row (updates only).
    pub row_id: Option<RowId>,

    /// Logical identity, when the caller supplied one.
    pub identity: Option<RecordIdentity>,

    /// Full payload for creates, patch for updates.
    pub data: FieldMap,

    /// Stored values before the write (updates only).
    pub current: Option<FieldMap>,
}

/// Hook verdict.
#[derive(Debug)]
pub enum HookOutcome {
    Approved,
    Modified(FieldMap),
    Rejected(GuardError),
}

/// Pre-commit interceptor.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn before_write(&self, pending: &PendingWrite) -> HookOutcome;
}

/// Errors surfaced by the write path.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Rejected(#[from] GuardError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Write path for content records.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
        }
    }

    /// Register a hook.
    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create a row. Without an identity the store assigns a fresh one after
    /// the hooks approve.
    pub async fn create(
        &self,
        record_type: &str,
        identity: Option<RecordIdentity>,
        data: FieldMap,
    ) -> Result<StoredRecord, WriteError> {
        let pending = PendingWrite {
            kind: WriteKind::Create,
            record_type: record_type.to_string(),
            row_id: None,
            identity,
            data,
            current: None,
        };

        let (identity, data) = self.run_hooks(pending).await?;
        let identity = identity.unwrap_or_else(RecordIdentity::generate);
        let record = self.store.insert(record_type, identity, data).await?;

        debug!(
            record_type = %record_type,
            row_id = %record.row_id,
            record_identity = %record.identity,
            "Created record"
        );
        Ok(record)
    }

    /// Update a row with a partial payload.
    pub async fn update(
        &self,
        record_type: &str,
        row_id: RowId,
        patch: FieldMap,
    ) -> Result<StoredRecord, WriteError> {
        let existing = self
            .store
            .get(record_type, row_id)
            .await?
            .ok_or_else(|| StoreError::RowNotFound {
                record_type: record_type.to_string(),
                row_id,
            })?;

        let pending = PendingWrite {
            kind: WriteKind::Update,
            record_type: record_type.to_string(),
            row_id: Some(row_id),
            identity: Some(existing.identity),
            data: patch,
            current: Some(existing.data),
        };

        let (_, patch) = self.run_hooks(pending).await?;
        let record = self.store.update(record_type, row_id, patch).await?;

        debug!(record_type = %record_type, row_id = %row_id, "Updated record");
        Ok(record)
    }

    async fn run_hooks(
        &self,
        mut pending: PendingWrite,
    ) -> Result<(Option<RecordIdentity>, FieldMap), WriteError> {
        for hook in &self.hooks {
            match hook.before_write(&pending).await {
                HookOutcome::Approved => {}
                HookOutcome::Modified(data) => pending.data = data,
                HookOutcome::Rejected(err) => return Err(err.into()),
            }
        }
        Ok((pending.identity, pending.data))
    }
}
