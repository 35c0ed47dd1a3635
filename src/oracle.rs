//! Uniqueness checks against the authoritative store.

use std::sync::Arc;

use serde::Serialize;

use crate::store::{self, RecordIdentity, RecordStore};

/// Who, if anyone, already holds a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    pub exists: bool,
    pub owner: Option<RecordIdentity>,
}

impl Ownership {
    pub fn vacant() -> Self {
        Self {
            exists: false,
            owner: None,
        }
    }
}

/// Answers "is this value already assigned?" for one (record type, field).
///
/// A disabled oracle never queries the store and always reports vacant.
#[derive(Clone)]
pub struct UniquenessOracle {
    store: Arc<dyn RecordStore>,
    enabled: bool,
}

impl UniquenessOracle {
    pub fn new(store: Arc<dyn RecordStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look for a row of `record_type` holding `value` in `field`.
    ///
    /// Rows belonging to `exclude` are ignored, so revisions of the record
    /// being written never count against it. The owner reported is the
    /// identity of the first matching row in store order.
    pub async fn exists(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
        exclude: Option<&RecordIdentity>,
    ) -> store::Result<Ownership> {
        if !self.enabled {
            return Ok(Ownership::vacant());
        }

        let owner = self
            .store
            .find_by_value(record_type, field, value)
            .await?
            .into_iter()
            .map(|r| r.identity)
            .find(|identity| Some(identity) != exclude);

        Ok(Ownership {
            exists: owner.is_some(),
            owner,
        })
    }

    /// Every distinct identity holding `value`, in store order.
    pub async fn owners(&self, record_type: &str, field: &str, value: &str) -> store::Result<Vec<RecordIdentity>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut owners: Vec<RecordIdentity> = Vec::new();
        for row in self.store.find_by_value(record_type, field, value).await? {
            if !owners.contains(&row.identity) {
                owners.push(row.identity);
            }
        }
        Ok(owners)
    }
}
