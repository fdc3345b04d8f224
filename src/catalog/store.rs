//! Shared catalog with single-writer / multi-reader discipline
//!
//! Readers take a consistent snapshot through the read lock. Mutation plans are
//! committed one at a time behind the commit gate: each atomic edit goes to the
//! live model first, and the catalog itself is swapped to the new state under a
//! single write lock only once every edit has been accepted.

use super::{SchemaCatalog, SchemaSnapshot};
use crate::collaborators::{ModelCommitter, SchemaProvider};
use crate::error::{AssistError, CommitError, PlanError, Result};
use crate::planner::{MutationPlan, PlanStep};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{error, info, warn};

pub struct CatalogStore {
    catalog: RwLock<SchemaCatalog>,
    commit_gate: Mutex<()>,
}

impl CatalogStore {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            commit_gate: Mutex::new(()),
        }
    }

    /// Fetch the schema from the provider and build a fresh catalog.
    pub async fn connect(provider: &dyn SchemaProvider) -> Result<Self> {
        info!("Fetching schema from {}", provider.describe());
        let snapshot = provider.fetch_schema().await?;
        let catalog = SchemaCatalog::from_snapshot(snapshot)?;
        info!(
            "Catalog loaded: {} tables, {} relationships, {} measures, {} roles",
            catalog.tables().len(),
            catalog.relationships().len(),
            catalog.measures().len(),
            catalog.roles().len()
        );
        Ok(Self::new(catalog))
    }

    /// Replace the catalog with a new snapshot from the provider. Waits for any
    /// in-flight commit; the version keeps increasing across refreshes.
    pub async fn refresh(&self, provider: &dyn SchemaProvider) -> Result<u64> {
        let _gate = self.commit_gate.lock().await;
        let snapshot = provider.fetch_schema().await?;
        self.replace(snapshot).await
    }

    async fn replace(&self, snapshot: SchemaSnapshot) -> Result<u64> {
        let mut fresh = SchemaCatalog::from_snapshot(snapshot)?;
        let mut catalog = self.catalog.write().await;
        fresh.set_version(catalog.version() + 1);
        *catalog = fresh;
        info!("Catalog refreshed to version {}", catalog.version());
        Ok(catalog.version())
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, SchemaCatalog> {
        self.catalog.read().await
    }

    /// Owned copy for callers that must not hold the lock across awaits.
    pub async fn snapshot(&self) -> SchemaCatalog {
        self.catalog.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.catalog.read().await.version()
    }

    /// Commit `plan` through `committer`. Runs on its own task so that dropping
    /// the returned future does not stop a commit half way.
    pub async fn commit(
        self: &Arc<Self>,
        plan: MutationPlan,
        committer: Arc<dyn ModelCommitter>,
    ) -> Result<u64> {
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move { store.commit_serialized(plan, committer).await });
        handle.await.map_err(|e| {
            AssistError::Commit(CommitError {
                step: 0,
                description: "commit task".to_string(),
                message: e.to_string(),
                rollback_failures: Vec::new(),
            })
        })?
    }

    async fn commit_serialized(
        &self,
        plan: MutationPlan,
        committer: Arc<dyn ModelCommitter>,
    ) -> Result<u64> {
        let _gate = self.commit_gate.lock().await;

        let current = self.version().await;
        if current != plan.base_version {
            warn!(
                "Plan {} was built against version {}, catalog is at {}",
                plan.id, plan.base_version, current
            );
            return Err(PlanError::StaleCatalog {
                planned: plan.base_version,
                current,
            }
            .into());
        }

        info!("Committing plan {} ({} steps): {}", plan.id, plan.steps.len(), plan.summary);
        let mut applied: Vec<&PlanStep> = Vec::new();
        for step in &plan.steps {
            info!("Step {}: {}", step.index, step.description);
            if let Err(rejected) = committer.apply_mutation(&step.edit).await {
                warn!("Step {} rejected: {}; rolling back {} step(s)", step.index, rejected, applied.len());
                let rollback_failures = undo(committer.as_ref(), &applied).await;
                return Err(CommitError {
                    step: step.index,
                    description: step.description.clone(),
                    message: rejected.to_string(),
                    rollback_failures,
                }
                .into());
            }
            applied.push(step);
        }

        let mut catalog = self.catalog.write().await;
        if let Err(e) = catalog.apply_plan(&plan) {
            // The live model already took every edit; bring it back in line.
            error!("Catalog refused plan {} after live commit: {}", plan.id, e);
            let rollback_failures = undo(committer.as_ref(), &applied).await;
            return Err(CommitError {
                step: plan.steps.len(),
                description: "update catalog".to_string(),
                message: e.to_string(),
                rollback_failures,
            }
            .into());
        }
        info!("Plan {} committed, catalog at version {}", plan.id, catalog.version());
        Ok(catalog.version())
    }
}

/// Replay inverse edits for `applied`, newest first.
async fn undo(committer: &dyn ModelCommitter, applied: &[&PlanStep]) -> Vec<String> {
    let mut failures = Vec::new();
    for step in applied.iter().rev() {
        info!("Rolling back step {}: {}", step.index, step.inverse.describe());
        if let Err(e) = committer.apply_mutation(&step.inverse).await {
            error!("Rollback of step {} failed: {}", step.index, e);
            failures.push(format!("step {}: {}", step.index, e));
        }
    }
    failures
}
