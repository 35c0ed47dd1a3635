//! Startup reconciliation.
//!
//! When `autoMigrate` is set the daemon runs one live reconciliation over
//! every category on a background task, so the API is available while it
//! runs.

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::reconcile::{FixOptions, ReconciliationResult, Reconciler};
use crate::store::StoreError;

/// Spawn a live fix over all categories.
pub fn spawn_auto_migrate(reconciler: Reconciler) -> JoinHandle<Result<ReconciliationResult, StoreError>> {
    tokio::spawn(async move {
        info!(fields = reconciler.registry().len(), "Auto-migration started");

        let result = match reconciler.fix(FixOptions::all(false)).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Auto-migration aborted");
                return Err(e);
            }
        };

        if result.errors.is_empty() {
            info!(
                fixed = result.fixed.total(),
                scanned = result.scanned,
                "Auto-migration complete"
            );
        } else {
            warn!(
                fixed = result.fixed.total(),
                errors = result.errors.len(),
                "Auto-migration finished with errors"
            );
            for e in &result.errors {
                error!(
                    record_type = %e.record_type,
                    field = %e.field,
                    record_identity = ?e.record_identity,
                    error = %e.error,
                    "Auto-migration record failure"
                );
            }
        }

        Ok(result)
    })
}

/// Await `task` on its own task and log it if it panicked or was cancelled.
///
/// Resolves to `None` in that case.
pub fn supervise<F>(name: &'static str, task: JoinHandle<F>) -> JoinHandle<Option<F>>
where
    F: Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(output) => Some(output),
            Err(err) if err.is_panic() => {
                error!(task = name, error = %err, "Background task panicked");
                None
            }
            Err(err) => {
                warn!(task = name, error = %err, "Background task did not finish");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::guard::Allocator;
    use crate::identifier::RandomSource;
    use crate::oracle::UniquenessOracle;
    use crate::registry::{FieldRegistry, MonitoredField};
    use crate::store::{FieldMap, MemoryStore, RecordStore};

    #[tokio::test]
    async fn test_auto_migrate_fills_empty_values() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("api::article.article", "doc-a".into(), FieldMap::new())
            .await
            .unwrap();

        let registry = Arc::new(FieldRegistry::from_fields(vec![MonitoredField::new(
            "api::article.article",
            "uuid",
        )]));
        let oracle = UniquenessOracle::new(store.clone(), true);
        let allocator = Allocator::new(&Config::default(), oracle, Arc::new(RandomSource));
        let reconciler = Reconciler::new(registry, store.clone(), allocator);

        let result = supervise("auto-migration", spawn_auto_migrate(reconciler))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!result.dry_run);
        assert_eq!(result.fixed.empty, 1);

        let rows = store
            .find_by_identity("api::article.article", &"doc-a".into())
            .await
            .unwrap();
        assert!(rows[0].identifier("uuid").is_some());
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let doomed = tokio::spawn(async {
            panic!("boom");
        });
        let outcome = supervise("doomed", doomed).await.unwrap();
        assert_eq!(outcome, None::<()>);

        let outcome = supervise("fine", tokio::spawn(async { 7 })).await.unwrap();
        assert_eq!(outcome, Some(7));
    }
}
