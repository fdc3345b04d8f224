//! Boundary contracts with the outside world
//!
//! The engine never talks to an analytical server itself. Schema snapshots
//! come from a [`SchemaProvider`], validated expressions go to an
//! [`ExpressionExecutor`] (paired with the renderer for its language) and
//! mutation plans are applied edit by edit through a [`ModelCommitter`].

use crate::catalog::{CatalogEdit, SchemaSnapshot};
use crate::error::{ConnectionError, EditRejected, ExecutionError};
use crate::expr::ExpressionRenderer;
use crate::validator::ValidatedExpression;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ConnectionError>;

    /// Human-readable description of where the schema comes from.
    fn describe(&self) -> String;
}

#[async_trait]
pub trait ExpressionExecutor: Send + Sync {
    fn renderer(&self) -> &dyn ExpressionRenderer;

    async fn execute(&self, expression: &ValidatedExpression) -> Result<Vec<Value>, ExecutionError>;

    /// Query text the executor sends for `expression`.
    fn render(&self, expression: &ValidatedExpression) -> String {
        self.renderer().render_query(expression.expr())
    }
}

/// Applies one atomic edit to the live model.
#[async_trait]
pub trait ModelCommitter: Send + Sync {
    async fn apply_mutation(&self, edit: &CatalogEdit) -> Result<(), EditRejected>;
}

/// Reads a schema snapshot from a JSON model description on disk.
pub struct JsonFileSchemaProvider {
    path: PathBuf,
}

impl JsonFileSchemaProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SchemaProvider for JsonFileSchemaProvider {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ConnectionError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConnectionError(format!("cannot read {}: {}", self.path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ConnectionError(format!("invalid model file {}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Serves a fixed snapshot; useful for embedding and tests.
pub struct InMemorySchemaProvider {
    snapshot: SchemaSnapshot,
}

impl InMemorySchemaProvider {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl SchemaProvider for InMemorySchemaProvider {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot, ConnectionError> {
        Ok(self.snapshot.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory model ({} tables)", self.snapshot.tables.len())
    }
}

/// Accepts every edit and logs it. Stands in for a live model when plans are
/// only applied to the local catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCommitter;

#[async_trait]
impl ModelCommitter for LoggingCommitter {
    async fn apply_mutation(&self, edit: &CatalogEdit) -> Result<(), EditRejected> {
        info!("Applied: {}", edit.describe());
        Ok(())
    }
}
