//! Write-time guard.
//!
//! Runs as a [`LifecycleHook`] on every create and update of a record type
//! with monitored fields.
//!
//! Create:
//! - missing or malformed value: generate one when `autoGenerate` is on
//!   (missing values are otherwise left empty, malformed ones rejected)
//! - value held by another record identity: replace with a fresh value
//! - value held only by revisions of the same identity: keep it
//! - value exists but the write carries no identity: per
//!   `unidentifiedDuplicates`
//!
//! Update:
//! - fields absent from the patch are never touched
//! - a changed value must be well-formed and not held by another identity
//!
//! Fresh values come from [`Allocator`], which regenerates until the oracle
//! reports the candidate vacant or the attempt budget runs out.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{Config, UnidentifiedDuplicates};
use crate::identifier::{IdentifierSource, UuidVersion};
use crate::oracle::UniquenessOracle;
use crate::registry::{FieldRegistry, MonitoredField};
use crate::store::{
    identifier_value, is_blank, FieldMap, HookOutcome, LifecycleHook, PendingWrite, StoreError,
    WriteKind,
};

/// Errors raised while guarding a write.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("No unique value for {record_type}.{field} after {attempts} attempts")]
    GenerationExhausted {
        record_type: String,
        field: String,
        attempts: u32,
    },

    #[error("Invalid value {value:?} for {record_type}.{field}: {reason}")]
    Validation {
        record_type: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, GuardError>;

/// Bounded generate-and-recheck loop.
#[derive(Clone)]
pub struct Allocator {
    oracle: UniquenessOracle,
    source: Arc<dyn IdentifierSource>,
    default_version: UuidVersion,
    max_attempts: u32,
}

impl Allocator {
    pub fn new(config: &Config, oracle: UniquenessOracle, source: Arc<dyn IdentifierSource>) -> Self {
        Self {
            oracle,
            source,
            default_version: config.default_version,
            max_attempts: config.max_retry_attempts,
        }
    }

    pub fn oracle(&self) -> &UniquenessOracle {
        &self.oracle
    }

    /// Produce a value for `field` that no row holds and that is not in
    /// `reserved`.
    pub async fn allocate(&self, field: &MonitoredField, reserved: &HashSet<String>) -> Result<String> {
        let version = field.version(self.default_version);

        for attempt in 1..=self.max_attempts {
            let candidate = self.source.generate(version, field.prefix());

            if reserved.contains(&candidate) {
                debug!(
                    record_type = %field.record_type,
                    field = %field.field,
                    attempt,
                    "Generated value already reserved in this run, regenerating"
                );
                continue;
            }

            let ownership = self
                .oracle
                .exists(&field.record_type, &field.field, &candidate, None)
                .await?;
            if !ownership.exists {
                return Ok(candidate);
            }

            debug!(
                record_type = %field.record_type,
                field = %field.field,
                attempt,
                owner = ?ownership.owner,
                "Generated value collides, regenerating"
            );
        }

        error!(
            record_type = %field.record_type,
            field = %field.field,
            attempts = self.max_attempts,
            "Exhausted attempts generating a unique value"
        );
        Err(GuardError::GenerationExhausted {
            record_type: field.record_type.clone(),
            field: field.field.clone(),
            attempts: self.max_attempts,
        })
    }
}

/// Pre-commit hook enforcing identifier policy.
pub struct WriteGuard {
    config: Arc<Config>,
    registry: Arc<FieldRegistry>,
    allocator: Allocator,
}

impl WriteGuard {
    pub fn new(config: Arc<Config>, registry: Arc<FieldRegistry>, allocator: Allocator) -> Self {
        Self {
            config,
            registry,
            allocator,
        }
    }

    /// Apply create policy. `None` means the payload passes unchanged.
    pub async fn guard_create(&self, pending: &PendingWrite) -> Result<Option<FieldMap>> {
        let mut data = pending.data.clone();
        let mut changed = false;
        let none_reserved = HashSet::new();

        for field in self.registry.fields_for(&pending.record_type) {
            let supplied = identifier_value(data.get(&field.field));

            let replace = match supplied.as_deref() {
                value if is_blank(value) => self.config.auto_generate,
                Some(value) if !field.is_valid(value) => {
                    if !self.config.auto_generate {
                        return Err(self.rejection(field, value, "does not match the identifier layout"));
                    }
                    warn!(
                        record_type = %field.record_type,
                        field = %field.field,
                        value = %value,
                        "Replacing malformed value on create"
                    );
                    true
                }
                Some(value) => self.is_foreign_duplicate(field, pending, value).await?,
                None => false,
            };

            if replace {
                let fresh = self.allocator.allocate(field, &none_reserved).await?;
                debug!(
                    record_type = %field.record_type,
                    field = %field.field,
                    value = %fresh,
                    "Assigned value on create"
                );
                data.insert(field.field.clone(), Value::String(fresh));
                changed = true;
            }
        }

        Ok(changed.then_some(data))
    }

    /// Apply update policy. `None` means the patch passes unchanged.
    pub async fn guard_update(&self, pending: &PendingWrite) -> Result<Option<FieldMap>> {
        let mut data = pending.data.clone();
        let mut changed = false;
        let none_reserved = HashSet::new();

        for field in self.registry.fields_for(&pending.record_type) {
            let Some(raw) = pending.data.get(&field.field) else {
                continue;
            };

            let incoming = identifier_value(Some(raw));
            let stored = pending
                .current
                .as_ref()
                .and_then(|current| identifier_value(current.get(&field.field)));
            if incoming == stored {
                continue;
            }

            let value = match incoming {
                Some(value) if !value.trim().is_empty() => value,
                _ => {
                    if !self.config.auto_generate {
                        return Err(self.rejection(field, "", "value cannot be cleared"));
                    }
                    let fresh = self.allocator.allocate(field, &none_reserved).await?;
                    data.insert(field.field.clone(), Value::String(fresh));
                    changed = true;
                    continue;
                }
            };

            if !self.config.allow_manual_edit {
                return Err(self.rejection(field, &value, "manual edits are disabled"));
            }

            if !field.is_valid(&value) {
                return Err(self.rejection(field, &value, "does not match the identifier layout"));
            }

            let ownership = self
                .allocator
                .oracle()
                .exists(&field.record_type, &field.field, &value, pending.identity.as_ref())
                .await?;
            if let Some(owner) = ownership.owner {
                return Err(self.rejection(
                    field,
                    &value,
                    &format!("already assigned to record {owner}"),
                ));
            }
        }

        Ok(changed.then_some(data))
    }

    /// Whether a well-formed value on a create belongs to someone else.
    async fn is_foreign_duplicate(
        &self,
        field: &MonitoredField,
        pending: &PendingWrite,
        value: &str,
    ) -> Result<bool> {
        let ownership = self
            .allocator
            .oracle()
            .exists(&field.record_type, &field.field, value, pending.identity.as_ref())
            .await?;

        if !ownership.exists {
            return Ok(false);
        }

        match &pending.identity {
            Some(identity) => {
                warn!(
                    record_type = %field.record_type,
                    field = %field.field,
                    value = %value,
                    record_identity = %identity,
                    owner = ?ownership.owner,
                    "Value already held by another record, reassigning"
                );
                Ok(true)
            }
            None => {
                let regenerate =
                    self.config.unidentified_duplicates == UnidentifiedDuplicates::Regenerate;
                debug!(
                    record_type = %field.record_type,
                    field = %field.field,
                    value = %value,
                    owner = ?ownership.owner,
                    regenerate,
                    "Existing value on a create without record identity"
                );
                Ok(regenerate)
            }
        }
    }

    fn rejection(&self, field: &MonitoredField, value: &str, reason: &str) -> GuardError {
        warn!(
            record_type = %field.record_type,
            field = %field.field,
            value = %value,
            reason = %reason,
            "Rejected write"
        );
        GuardError::Validation {
            record_type: field.record_type.clone(),
            field: field.field.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl LifecycleHook for WriteGuard {
    async fn before_write(&self, pending: &PendingWrite) -> HookOutcome {
        let verdict = match pending.kind {
            WriteKind::Create => self.guard_create(pending).await,
            WriteKind::Update => self.guard_update(pending).await,
        };

        match verdict {
            Ok(None) => HookOutcome::Approved,
            Ok(Some(data)) => HookOutcome::Modified(data),
            Err(e) => HookOutcome::Rejected(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{is_valid, RandomSource};
    use crate::store::{MemoryStore, RecordStore, Repository, WriteError};
    use serde_json::json;
    use uuid::Uuid;

    const TYPE: &str = "api::article.article";
    const EXISTING: &str = "3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23";

    /// Always emits the same value.
    struct Fixed(&'static str);

    impl IdentifierSource for Fixed {
        fn next_uuid(&self, _version: UuidVersion) -> Uuid {
            Uuid::parse_str(self.0).unwrap()
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        repo: Repository,
    }

    fn registry() -> Arc<FieldRegistry> {
        Arc::new(FieldRegistry::from_fields(vec![
            MonitoredField::new(TYPE, "uuid"),
            MonitoredField::new(TYPE, "ref").with_options(crate::registry::FieldOptions {
                prefix: Some("art_".to_string()),
                version: Some(UuidVersion::V7),
            }),
        ]))
    }

    fn harness_with(config: Config, source: Arc<dyn IdentifierSource>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let oracle = UniquenessOracle::new(store.clone(), config.validate_uniqueness);
        let allocator = Allocator::new(&config, oracle, source);
        let guard = WriteGuard::new(Arc::new(config), registry(), allocator);
        let repo = Repository::new(store.clone()).with_hook(Arc::new(guard));
        Harness { store, repo }
    }

    fn harness(config: Config) -> Harness {
        harness_with(config, Arc::new(RandomSource))
    }

    fn payload(value: serde_json::Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_fills_missing_values() {
        let h = harness(Config::default());

        let record = h
            .repo
            .create(TYPE, None, payload(json!({ "title": "t", "uuid": "" })))
            .await
            .unwrap();

        let uuid = record.identifier("uuid").unwrap();
        assert!(is_valid(&uuid));

        let reference = record.identifier("ref").unwrap();
        assert!(reference.starts_with("art_"));
        assert!(is_valid(&reference["art_".len()..]));
        assert_eq!(reference.as_bytes()["art_".len() + 14], b'7');
    }

    #[tokio::test]
    async fn test_create_without_autogenerate_leaves_empty() {
        let h = harness(Config {
            auto_generate: false,
            ..Config::default()
        });

        let record = h.repo.create(TYPE, None, FieldMap::new()).await.unwrap();
        assert_eq!(record.identifier("uuid"), None);

        let rejected = h
            .repo
            .create(TYPE, None, payload(json!({ "uuid": "not-a-uuid" })))
            .await;
        assert!(matches!(
            rejected,
            Err(WriteError::Rejected(GuardError::Validation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_replaces_malformed_value() {
        let h = harness(Config::default());
        let record = h
            .repo
            .create(TYPE, None, payload(json!({ "uuid": "not-a-uuid" })))
            .await
            .unwrap();
        assert!(is_valid(&record.identifier("uuid").unwrap()));
    }

    #[tokio::test]
    async fn test_create_duplicate_from_other_record_is_reassigned() {
        let h = harness(Config::default());

        let first = h
            .repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let second = h
            .repo
            .create(TYPE, Some("doc-b".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();

        assert_eq!(first.identifier("uuid").as_deref(), Some(EXISTING));
        let reassigned = second.identifier("uuid").unwrap();
        assert_ne!(reassigned, EXISTING);
        assert!(is_valid(&reassigned));
    }

    #[tokio::test]
    async fn test_create_revision_keeps_value() {
        let h = harness(Config::default());

        h.repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let published = h
            .repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();

        assert_eq!(published.identifier("uuid").as_deref(), Some(EXISTING));
        let holders = h.store.find_by_value(TYPE, "uuid", EXISTING).await.unwrap();
        assert_eq!(holders.len(), 2);
    }

    #[tokio::test]
    async fn test_create_without_identity_follows_policy() {
        let keep = harness(Config::default());
        keep.repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let kept = keep
            .repo
            .create(TYPE, None, payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        assert_eq!(kept.identifier("uuid").as_deref(), Some(EXISTING));

        let regen = harness(Config {
            unidentified_duplicates: UnidentifiedDuplicates::Regenerate,
            ..Config::default()
        });
        regen
            .repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let replaced = regen
            .repo
            .create(TYPE, None, payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        assert_ne!(replaced.identifier("uuid").as_deref(), Some(EXISTING));
    }

    #[tokio::test]
    async fn test_generation_exhaustion_aborts_create() {
        let h = harness_with(
            Config {
                max_retry_attempts: 1,
                ..Config::default()
            },
            Arc::new(Fixed(EXISTING)),
        );
        h.store
            .insert(TYPE, "doc-a".into(), payload(json!({ "uuid": EXISTING, "ref": "x" })))
            .await
            .unwrap();

        let result = h.repo.create(TYPE, Some("doc-b".into()), FieldMap::new()).await;

        assert!(matches!(
            result,
            Err(WriteError::Rejected(GuardError::GenerationExhausted { attempts: 1, .. }))
        ));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_leaves_untouched_field() {
        let h = harness(Config::default());
        let record = h
            .repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "title": "a" })))
            .await
            .unwrap();
        let before = record.identifier("uuid");

        let updated = h
            .repo
            .update(TYPE, record.row_id, payload(json!({ "title": "b" })))
            .await
            .unwrap();

        assert_eq!(updated.identifier("uuid"), before);
        assert_eq!(updated.data["title"], json!("b"));
    }

    #[tokio::test]
    async fn test_update_rejects_malformed_and_taken_values() {
        let h = harness(Config::default());
        h.repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let other = h
            .repo
            .create(TYPE, Some("doc-b".into()), FieldMap::new())
            .await
            .unwrap();

        let malformed = h
            .repo
            .update(TYPE, other.row_id, payload(json!({ "uuid": "nope" })))
            .await;
        match malformed {
            Err(WriteError::Rejected(GuardError::Validation { field, value, .. })) => {
                assert_eq!(field, "uuid");
                assert_eq!(value, "nope");
            }
            unexpected => panic!("expected validation error, got {unexpected:?}"),
        }

        let taken = h
            .repo
            .update(TYPE, other.row_id, payload(json!({ "uuid": EXISTING })))
            .await;
        assert!(matches!(
            taken,
            Err(WriteError::Rejected(GuardError::Validation { .. }))
        ));

        // Unchanged on failure.
        let stored = h.store.get(TYPE, other.row_id).await.unwrap().unwrap();
        assert_eq!(stored.identifier("uuid"), other.identifier("uuid"));
    }

    #[tokio::test]
    async fn test_update_accepts_own_revision_value() {
        let h = harness(Config::default());
        h.repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let draft = h
            .store
            .insert(TYPE, "doc-a".into(), FieldMap::new())
            .await
            .unwrap();

        let updated = h
            .repo
            .update(TYPE, draft.row_id, payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        assert_eq!(updated.identifier("uuid").as_deref(), Some(EXISTING));
    }

    #[tokio::test]
    async fn test_update_respects_manual_edit_switch() {
        let h = harness(Config {
            allow_manual_edit: false,
            ..Config::default()
        });
        let record = h.repo.create(TYPE, None, FieldMap::new()).await.unwrap();

        let result = h
            .repo
            .update(TYPE, record.row_id, payload(json!({ "uuid": EXISTING })))
            .await;
        assert!(matches!(
            result,
            Err(WriteError::Rejected(GuardError::Validation { .. }))
        ));

        // Re-sending the stored value is not an edit.
        let same = record.identifier("uuid").unwrap();
        h.repo
            .update(TYPE, record.row_id, payload(json!({ "uuid": same })))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_clearing_value() {
        let h = harness(Config::default());
        let record = h.repo.create(TYPE, None, FieldMap::new()).await.unwrap();
        let before = record.identifier("uuid").unwrap();

        let updated = h
            .repo
            .update(TYPE, record.row_id, payload(json!({ "uuid": null })))
            .await
            .unwrap();
        let after = updated.identifier("uuid").unwrap();
        assert!(is_valid(&after));
        assert_ne!(after, before);

        let strict = harness(Config {
            auto_generate: false,
            ..Config::default()
        });
        let record = strict
            .repo
            .create(TYPE, None, payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let result = strict
            .repo
            .update(TYPE, record.row_id, payload(json!({ "uuid": "" })))
            .await;
        assert!(matches!(
            result,
            Err(WriteError::Rejected(GuardError::Validation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_uniqueness_disabled_accepts_collisions() {
        let h = harness(Config {
            validate_uniqueness: false,
            ..Config::default()
        });
        h.repo
            .create(TYPE, Some("doc-a".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        let second = h
            .repo
            .create(TYPE, Some("doc-b".into()), payload(json!({ "uuid": EXISTING })))
            .await
            .unwrap();
        assert_eq!(second.identifier("uuid").as_deref(), Some(EXISTING));
    }
}
