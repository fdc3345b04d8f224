use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tabular_copilot::catalog::CatalogEdit;
use tabular_copilot::collaborators::{LoggingCommitter, ModelCommitter};
use tabular_copilot::error::{EditRejected, PlanError};
use tabular_copilot::planner::{MutationPlan, MutationPlanner, MutationRequest};
use tabular_copilot::{AssistError, CatalogStore, SchemaCatalog, SchemaSnapshot};
use tokio::sync::Mutex;

const SAMPLE_MODEL: &str = include_str!("../demos/sample_model.json");

fn sample_catalog() -> SchemaCatalog {
    let snapshot: SchemaSnapshot = serde_json::from_str(SAMPLE_MODEL).unwrap();
    SchemaCatalog::from_snapshot(snapshot).unwrap()
}

/// Live model that accepts edits until the `fail_at`-th forward edit.
/// Rollback edits issued after the failure are always accepted.
struct FlakyModel {
    model: Mutex<SchemaCatalog>,
    calls: AtomicUsize,
    fail_at: usize,
}

impl FlakyModel {
    fn new(model: SchemaCatalog, fail_at: usize) -> Self {
        Self {
            model: Mutex::new(model),
            calls: AtomicUsize::new(0),
            fail_at,
        }
    }
}

#[async_trait]
impl ModelCommitter for FlakyModel {
    async fn apply_mutation(&self, edit: &CatalogEdit) -> Result<(), EditRejected> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_at {
            return Err(EditRejected(format!("refused {}", edit.describe())));
        }
        self.model
            .lock()
            .await
            .apply(edit)
            .map_err(|e| EditRejected(e.to_string()))
    }
}

fn remove_sales_plan(catalog: &SchemaCatalog) -> MutationPlan {
    MutationPlanner::new()
        .plan(
            &MutationRequest::RemoveTable {
                table: "Sales".into(),
            },
            catalog,
        )
        .unwrap()
}

#[tokio::test]
async fn failure_at_any_step_leaves_both_sides_untouched() {
    let original = sample_catalog();
    let steps = remove_sales_plan(&original).steps.len();
    assert_eq!(steps, 5);

    for k in 0..steps {
        let store = Arc::new(CatalogStore::new(original.clone()));
        let live = Arc::new(FlakyModel::new(original.clone(), k));
        let plan = remove_sales_plan(&store.snapshot().await);

        let err = store.commit(plan, live.clone()).await.unwrap_err();
        match err {
            AssistError::Commit(commit) => {
                assert_eq!(commit.step, k);
                assert!(commit.rollback_failures.is_empty());
            }
            other => panic!("step {}: unexpected error {:?}", k, other),
        }

        let catalog = store.snapshot().await;
        assert_eq!(catalog, original, "catalog changed after failure at step {}", k);
        assert_eq!(catalog.version(), 1);
        assert_eq!(
            live.model.lock().await.to_snapshot(),
            original.to_snapshot(),
            "live model not restored after failure at step {}",
            k
        );
        // k forward edits, the refused one, then k inverses
        assert_eq!(live.calls.load(Ordering::SeqCst), 2 * k + 1);
    }
}

#[tokio::test]
async fn successful_commit_reaches_both_sides() {
    let original = sample_catalog();
    let store = Arc::new(CatalogStore::new(original.clone()));
    let live = Arc::new(FlakyModel::new(original.clone(), usize::MAX));
    let plan = remove_sales_plan(&original);

    let version = store.commit(plan, live.clone()).await.unwrap();
    assert_eq!(version, 2);

    let catalog = store.snapshot().await;
    assert!(catalog.table("Sales").is_none());
    assert!(catalog.relationships().is_empty());
    assert!(catalog.measures().is_empty());
    assert_eq!(live.model.lock().await.to_snapshot(), catalog.to_snapshot());
}

#[tokio::test]
async fn concurrent_commits_of_the_same_base_serialize() {
    let original = sample_catalog();
    let store = Arc::new(CatalogStore::new(original.clone()));
    let planner = MutationPlanner::new();
    let rename = planner
        .plan(
            &MutationRequest::RenameTable {
                table: "Finance".into(),
                new_name: "Ledger".into(),
            },
            &original,
        )
        .unwrap();
    let remove = remove_sales_plan(&original);

    let (a, b) = tokio::join!(
        store.commit(rename, Arc::new(LoggingCommitter)),
        store.commit(remove, Arc::new(LoggingCommitter))
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(AssistError::Plan(PlanError::StaleCatalog { planned: 1, current: 2 }))
    )));
    assert_eq!(store.version().await, 2);
}
