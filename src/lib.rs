//! Natural-language requests against tabular BI models.
//!
//! A request is classified into an intent, its name-like slots are resolved
//! against the [`catalog::SchemaCatalog`], and the result is either a validated
//! expression tree (queries and measures), a read-only schema view, or a
//! reversible [`planner::MutationPlan`]. Connection transport, query execution
//! and live-model edits stay behind the traits in [`collaborators`].

pub mod assistant;
pub mod catalog;
pub mod clarification;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod expr;
pub mod intent;
pub mod planner;
pub mod resolver;
pub mod validator;

pub use assistant::{Assistant, ConnectionStatus, Outcome};
pub use catalog::{CatalogStore, SchemaCatalog, SchemaSnapshot};
pub use config::EngineConfig;
pub use error::{AssistError, Result};
