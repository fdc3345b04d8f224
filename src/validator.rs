//! Validator
//!
//! Full top-down traversal of an expression against the catalog. Every defect
//! is collected; a [`ValidatedExpression`] is only handed out when none were
//! found, so executors and committers never see an unchecked tree.

use crate::catalog::{ColumnRef, DataKind, MeasureDef, MeasureRef, SchemaCatalog};
use crate::error::ValidationError;
use crate::expr::{AggregateFn, Expr, Literal};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// An expression that passed validation against a specific catalog version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedExpression {
    expr: Expr,
    root_table: Option<String>,
    catalog_version: u64,
}

impl ValidatedExpression {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn root_table(&self) -> Option<&str> {
        self.root_table.as_deref()
    }

    pub fn catalog_version(&self) -> u64 {
        self.catalog_version
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        expr: &Expr,
        catalog: &SchemaCatalog,
    ) -> Result<ValidatedExpression, Vec<ValidationError>> {
        let mut check = Check::new(catalog, None);
        check.walk(expr);

        let graph = catalog.measure_dependencies();
        for measure in expr.measure_refs() {
            if let Some(cycle) = find_cycle(&graph, &measure) {
                check.report(ValidationError::RecursiveMeasure { cycle });
            }
        }
        check.finish(expr)
    }

    /// Validate a measure definition that is about to be added or redefined.
    /// The dependency graph is the catalog's plus the candidate itself, so a
    /// measure that reaches itself through others is caught before it exists.
    pub fn validate_measure(
        &self,
        measure: &MeasureDef,
        catalog: &SchemaCatalog,
    ) -> Result<ValidatedExpression, Vec<ValidationError>> {
        let candidate = measure.measure_ref();
        let mut check = Check::new(catalog, Some(&candidate));
        if catalog.table(&measure.table).is_none() {
            check.report(ValidationError::UnknownTable {
                table: measure.table.clone(),
            });
        }
        check.walk(&measure.expression);

        let mut graph = catalog.measure_dependencies();
        graph.insert(candidate.key(), measure.expression.measure_refs());
        if let Some(cycle) = find_cycle(&graph, &candidate) {
            check.report(ValidationError::RecursiveMeasure { cycle });
        }
        check.finish(&measure.expression)
    }
}

struct Check<'a> {
    catalog: &'a SchemaCatalog,
    candidate: Option<&'a MeasureRef>,
    errors: Vec<ValidationError>,
}

impl<'a> Check<'a> {
    fn new(catalog: &'a SchemaCatalog, candidate: Option<&'a MeasureRef>) -> Self {
        Self {
            catalog,
            candidate,
            errors: Vec::new(),
        }
    }

    fn report(&mut self, error: ValidationError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    /// Kind of `column`, reporting it when it does not exist.
    fn column_kind(&mut self, column: &ColumnRef) -> Option<DataKind> {
        if self.catalog.table(&column.table).is_none() {
            self.report(ValidationError::UnknownTable {
                table: column.table.clone(),
            });
        }
        match self.catalog.column(column) {
            Some(def) => Some(def.kind),
            None => {
                self.report(ValidationError::UnknownColumn {
                    column: column.clone(),
                });
                None
            }
        }
    }

    fn walk(&mut self, expr: &Expr) {
        match expr {
            Expr::Aggregate {
                function: AggregateFn::CountRows,
                column,
            } => {
                if self.catalog.table(&column.table).is_none() {
                    self.report(ValidationError::UnknownTable {
                        table: column.table.clone(),
                    });
                }
            }
            Expr::Aggregate { function, column } => {
                if let Some(kind) = self.column_kind(column) {
                    if !function.accepts(kind) {
                        self.report(ValidationError::IncompatibleAggregate {
                            function: *function,
                            column: column.clone(),
                            kind,
                        });
                    }
                }
            }
            Expr::Filter { predicate, child } => {
                if let Some(kind) = self.column_kind(&predicate.column) {
                    if !predicate.value.fits(kind) {
                        self.report(ValidationError::FilterTypeMismatch {
                            column: predicate.column.clone(),
                            kind,
                            value: predicate.value.to_string(),
                        });
                    }
                }
                self.walk(child);
            }
            Expr::TimeShift {
                date_column, child, ..
            } => {
                match self.column_kind(date_column) {
                    Some(DataKind::Date) => {
                        if let Some(root) = child.root_table() {
                            if self.catalog.table(root).is_some()
                                && !self.catalog.is_reachable(root, &date_column.table)
                            {
                                self.report(ValidationError::MissingDateRelationship {
                                    date_column: date_column.clone(),
                                    root_table: root.to_string(),
                                });
                            }
                        }
                    }
                    Some(kind) => self.report(ValidationError::TimeShiftNotDate {
                        column: date_column.clone(),
                        kind,
                    }),
                    // Unresolvable date column: the precondition fails too.
                    None => {
                        if let Some(root) = child.root_table() {
                            self.report(ValidationError::MissingDateRelationship {
                                date_column: date_column.clone(),
                                root_table: root.to_string(),
                            });
                        }
                    }
                }
                self.walk(child);
            }
            Expr::BinaryOp { left, right, .. } => {
                for operand in [left.as_ref(), right.as_ref()] {
                    self.check_operand(operand);
                    self.walk(operand);
                }
            }
            Expr::Literal { .. } => {}
            Expr::Column { column } => {
                self.column_kind(column);
            }
            Expr::Measure { measure } => {
                let is_candidate = self.candidate.map_or(false, |c| c.matches(measure));
                if !is_candidate && self.catalog.measure(measure).is_none() {
                    self.report(ValidationError::UnknownMeasure {
                        table: measure.table.clone(),
                        name: measure.name.clone(),
                    });
                }
            }
        }
    }

    fn check_operand(&mut self, operand: &Expr) {
        match operand {
            Expr::Literal {
                value: Literal::Number(_),
            } => {}
            Expr::Literal { value } => self.report(ValidationError::NonNumericOperand {
                operand: value.to_string(),
            }),
            Expr::Column { column } => {
                let kind = self.catalog.column(column).map(|c| c.kind);
                if kind.map_or(false, |k| k != DataKind::Numeric) {
                    self.report(ValidationError::NonNumericOperand {
                        operand: column.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    fn finish(self, expr: &Expr) -> Result<ValidatedExpression, Vec<ValidationError>> {
        if self.errors.is_empty() {
            debug!("Expression validated against catalog v{}", self.catalog.version());
            Ok(ValidatedExpression {
                expr: expr.clone(),
                root_table: expr.root_table().map(str::to_string),
                catalog_version: self.catalog.version(),
            })
        } else {
            warn!("Validation found {} defect(s)", self.errors.len());
            for e in &self.errors {
                debug!("  {}", e);
            }
            Err(self.errors)
        }
    }
}

/// Depth-first search for a dependency path leading back onto itself,
/// starting at `start`. Returns the cycle as display names, first node
/// repeated at the end.
fn find_cycle(graph: &BTreeMap<String, Vec<MeasureRef>>, start: &MeasureRef) -> Option<Vec<String>> {
    fn walk(
        graph: &BTreeMap<String, Vec<MeasureRef>>,
        path: &mut Vec<MeasureRef>,
        done: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        let current = path.last()?.key();
        for next in graph.get(&current).into_iter().flatten() {
            if let Some(pos) = path.iter().position(|p| p.matches(next)) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|m| m.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            if done.contains(&next.key()) {
                continue;
            }
            path.push(next.clone());
            if let Some(cycle) = walk(graph, path, done) {
                return Some(cycle);
            }
            path.pop();
            done.insert(next.key());
        }
        None
    }

    walk(graph, &mut vec![start.clone()], &mut HashSet::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::sample_catalog;
    use crate::catalog::CatalogEdit;
    use crate::expr::{BinaryOperator, ComparisonOp, Predicate, TimeShiftKind};

    fn amount() -> Expr {
        Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
    }

    #[test]
    fn test_valid_expression() {
        let catalog = sample_catalog();
        let expr = Expr::growth(TimeShiftKind::PriorYear, ColumnRef::new("Date", "Date"), amount());
        let validated = Validator::new().validate(&expr, &catalog).unwrap();
        assert_eq!(validated.root_table(), Some("Sales"));
        assert_eq!(validated.catalog_version(), catalog.version());
        assert_eq!(validated.expr(), &expr);
    }

    #[test]
    fn test_unknown_column_is_named() {
        let catalog = sample_catalog();
        let ghost = ColumnRef::new("Sales", "Discount");
        let expr = Expr::aggregate(AggregateFn::Sum, ghost.clone());
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert_eq!(errors, vec![ValidationError::UnknownColumn { column: ghost }]);
    }

    #[test]
    fn test_collects_every_defect() {
        let catalog = sample_catalog();
        let expr = Expr::filter(
            Predicate {
                column: ColumnRef::new("Sales", "Quantity"),
                op: ComparisonOp::Gt,
                value: Literal::Text("lots".into()),
            },
            Expr::time_shift(
                TimeShiftKind::PriorMonth,
                ColumnRef::new("Sales", "Region"),
                Expr::aggregate(AggregateFn::Average, ColumnRef::new("Products", "Category")),
            ),
        );
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ValidationError::FilterTypeMismatch { .. }));
        assert!(matches!(errors[1], ValidationError::TimeShiftNotDate { .. }));
        assert!(matches!(
            errors[2],
            ValidationError::IncompatibleAggregate {
                function: AggregateFn::Average,
                ..
            }
        ));
    }

    #[test]
    fn test_unreachable_date_table() {
        let catalog = sample_catalog();
        let expr = Expr::growth(
            TimeShiftKind::PriorYear,
            ColumnRef::new("Date", "Date"),
            Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Finance", "Revenue")),
        );
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::MissingDateRelationship {
                date_column: ColumnRef::new("Date", "Date"),
                root_table: "Finance".into(),
            }]
        );
    }

    #[test]
    fn test_missing_date_table_fails_the_date_precondition() {
        let snapshot: crate::catalog::SchemaSnapshot = serde_json::from_value(serde_json::json!({
            "tables": [{
                "name": "Finance",
                "columns": [{ "name": "Revenue", "kind": "numeric" }]
            }]
        }))
        .unwrap();
        let catalog = SchemaCatalog::from_snapshot(snapshot).unwrap();
        let date = ColumnRef::new("Date", "Date");
        let expr = Expr::time_shift(
            TimeShiftKind::PriorYear,
            date.clone(),
            Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Finance", "Revenue")),
        );
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert!(errors.contains(&ValidationError::MissingDateRelationship {
            date_column: date.clone(),
            root_table: "Finance".into(),
        }));
        assert!(errors.contains(&ValidationError::UnknownColumn { column: date }));
    }

    #[test]
    fn test_inactive_relationship_does_not_count() {
        let mut catalog = sample_catalog();
        let key = catalog.relationships()[0].key();
        catalog
            .apply(&CatalogEdit::SetRelationshipActive { key, active: false })
            .unwrap();
        let expr = Expr::time_shift(TimeShiftKind::PriorYear, ColumnRef::new("Date", "Date"), amount());
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert!(matches!(errors[0], ValidationError::MissingDateRelationship { .. }));
    }

    #[test]
    fn test_recursive_measure() {
        let catalog = sample_catalog();
        let order_count = MeasureRef::new("Sales", "Order Count");
        // Redefining Order Count in terms of a new measure that uses Order Count.
        let mut with_ratio = catalog.clone();
        with_ratio
            .apply(&CatalogEdit::InsertMeasure {
                index: 1,
                measure: MeasureDef {
                    name: "Ratio".into(),
                    table: "Sales".into(),
                    expression: Expr::binary(
                        BinaryOperator::Divide,
                        amount(),
                        Expr::measure(order_count.clone()),
                    ),
                    format_string: "0.00".into(),
                    aliases: Vec::new(),
                },
            })
            .unwrap();
        let redefined = MeasureDef {
            name: "Order Count".into(),
            table: "Sales".into(),
            expression: Expr::measure(MeasureRef::new("Sales", "Ratio")),
            format_string: "#,##0".into(),
            aliases: Vec::new(),
        };
        let errors = Validator::new()
            .validate_measure(&redefined, &with_ratio)
            .unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::RecursiveMeasure {
                cycle: vec![
                    "'Sales'[Order Count]".to_string(),
                    "'Sales'[Ratio]".to_string(),
                    "'Sales'[Order Count]".to_string(),
                ]
            }]
        );
    }

    #[test]
    fn test_self_reference_is_recursive_not_unknown() {
        let catalog = sample_catalog();
        let measure = MeasureDef {
            name: "Loop".into(),
            table: "Sales".into(),
            expression: Expr::binary(
                BinaryOperator::Add,
                Expr::measure(MeasureRef::new("Sales", "Loop")),
                Expr::Literal {
                    value: Literal::Number(1.0),
                },
            ),
            format_string: String::new(),
            aliases: Vec::new(),
        };
        let errors = Validator::new().validate_measure(&measure, &catalog).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::RecursiveMeasure { .. }));
    }

    #[test]
    fn test_text_operand_in_arithmetic() {
        let catalog = sample_catalog();
        let expr = Expr::binary(
            BinaryOperator::Multiply,
            amount(),
            Expr::Literal {
                value: Literal::Text("two".into()),
            },
        );
        let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::NonNumericOperand {
                operand: "two".into()
            }]
        );
    }
}
