use crate::catalog::{ColumnRef, DataKind};
use crate::expr::AggregateFn;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

/// Umbrella error for the request pipeline.
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ambiguity(#[from] AmbiguityError),

    #[error("Expression failed validation with {} defect(s): {}", .0.len(), join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Not connected to a model")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistError>;

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().join("; ")
}

/// Structural problem in a schema snapshot or a catalog edit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    #[error("Column '{0}' does not exist")]
    UnknownColumn(ColumnRef),

    #[error("Measure '{table}'[{name}] does not exist")]
    UnknownMeasure { table: String, name: String },

    #[error("Role '{0}' does not exist")]
    UnknownRole(String),

    #[error("Relationship {0} does not exist")]
    UnknownRelationship(String),

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("More than one active relationship from '{from}' to '{to}'")]
    DuplicateActiveRelationship { from: String, to: String },

    #[error("Index {index} out of range for {kind}")]
    IndexOutOfRange { kind: &'static str, index: usize },

    #[error("'{name}' is still referenced by {by}")]
    InUse { name: String, by: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("'{key}' must lie within 0.0..=1.0, got {value}")]
    OutOfRange { key: &'static str, value: f64 },

    #[error("'{key}' is not a number: {value}")]
    NotANumber { key: &'static str, value: String },

    #[error("Failed to read config: {0}")]
    Read(String),
}

/// Why a name-like slot could not be bound to exactly one catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    /// Nothing in the catalog resembles the slot.
    NoMatch,
    /// The best candidate scored below the acceptance threshold.
    BelowThreshold,
    /// Two or more candidates scored within the tie margin.
    Tied,
}

/// A candidate considered while resolving a slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub entity: crate::resolver::EntityRef,
    pub score: f64,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("Could not resolve '{text}' ({reason:?}); candidates: {}", describe_candidates(.candidates))]
pub struct AmbiguityError {
    pub text: String,
    pub role: crate::intent::SlotRole,
    pub reason: AmbiguityReason,
    pub candidates: Vec<Candidate>,
}

fn describe_candidates(candidates: &[Candidate]) -> String {
    if candidates.is_empty() {
        return "none".to_string();
    }
    candidates
        .iter()
        .map(|c| format!("{} ({:.2})", c.entity, c.score))
        .join(", ")
}

/// A single semantic or structural defect found by the validator.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("Unknown column {column}")]
    UnknownColumn { column: ColumnRef },

    #[error("Unknown measure '{table}'[{name}]")]
    UnknownMeasure { table: String, name: String },

    #[error("{function} cannot aggregate {column} of kind {kind}")]
    IncompatibleAggregate {
        function: AggregateFn,
        column: ColumnRef,
        kind: DataKind,
    },

    #[error("Time shift requires a date column but {column} is {kind}")]
    TimeShiftNotDate { column: ColumnRef, kind: DataKind },

    #[error(
        "Time shift over {date_column} needs an active relationship path from '{root_table}' to '{}'",
        .date_column.table
    )]
    MissingDateRelationship {
        date_column: ColumnRef,
        root_table: String,
    },

    #[error("Measure references itself through {}", .cycle.join(" -> "))]
    RecursiveMeasure { cycle: Vec<String> },

    #[error("Filter on {column} ({kind}) compares against incompatible value '{value}'")]
    FilterTypeMismatch {
        column: ColumnRef,
        kind: DataKind,
        value: String,
    },

    #[error("Arithmetic operand is not numeric: {operand}")]
    NonNumericOperand { operand: String },
}

/// Precondition failure detected before anything is applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    #[error("Column '{table}'[{column}] does not exist")]
    UnknownColumn { table: String, column: String },

    #[error("Measure '{0}' does not exist")]
    UnknownMeasure(String),

    #[error("Role '{0}' does not exist")]
    UnknownRole(String),

    #[error("No relationship between '{0}' and '{1}'")]
    UnknownRelationship(String, String),

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("An active relationship from '{from}' to '{to}' already exists")]
    DuplicateActiveRelationship { from: String, to: String },

    #[error("Column '{table}'[{column}] is still referenced by {}", .dependents.join(", "))]
    ColumnInUse {
        table: String,
        column: String,
        dependents: Vec<String>,
    },

    #[error("Mutation request is missing {0}")]
    MissingSlot(&'static str),

    #[error("Relationship endpoints {from} and {to} have incompatible kinds")]
    IncompatibleEndpoints { from: ColumnRef, to: ColumnRef },

    #[error("Plan was built against catalog version {planned}, catalog is at {current}")]
    StaleCatalog { planned: u64, current: u64 },

    #[error("Catalog rejected step: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Step {step} failed ({cause}) and rollback left edits unreverted: {}", .failures.join("; "))]
    RollbackIncomplete {
        step: usize,
        cause: CatalogError,
        failures: Vec<String>,
    },
}

/// Failure reported by the model committer while a plan is being applied.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Commit failed at step {step} ({description}): {message}")]
pub struct CommitError {
    pub step: usize,
    pub description: String,
    pub message: String,
    /// Inverse edits the committer also refused while rolling back.
    pub rollback_failures: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Connection error: {0}")]
pub struct ConnectionError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Execution error: {0}")]
pub struct ExecutionError(pub String);

/// The live model refused an atomic edit.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Edit rejected: {0}")]
pub struct EditRejected(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_serializes_tag_and_kind() {
        let error = ValidationError::TimeShiftNotDate {
            column: ColumnRef::new("Sales", "Region"),
            kind: DataKind::Text,
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["error"], "time_shift_not_date");
        assert_eq!(value["kind"], serde_json::to_value(DataKind::Text).unwrap());
        assert!(value.get("column").is_some());
    }
}
