//! Expression Synthesizer
//!
//! Builds expression trees bottom-up from a classified intent and its resolved
//! entities:
//!
//! 1. the subject becomes an aggregate (or a measure reference)
//! 2. each filter slot wraps it in a `Filter` node, first filter outermost
//! 3. a time window wraps the result in a `TimeShift`, or in a growth ratio
//!
//! Time shifts always reference the canonical date column of the subject's
//! table. Output depends only on the inputs; there is no randomness and no
//! iteration over unordered containers.

use super::{AggregateFn, BinaryOperator, Expr, Literal, Predicate};
use crate::catalog::{same_name, ColumnRef, DataKind, MeasureDef, SchemaCatalog, TableDef};
use crate::config::EngineConfig;
use crate::error::{AmbiguityError, AmbiguityReason, AssistError, Candidate, Result};
use crate::intent::{Intent, MeasureSlots, QuerySlots, SlotRole, TimeComparison};
use crate::resolver::{bound, normalize, EntityRef, ResolvedEntity};
use tracing::debug;

pub const AMOUNT_FORMAT: &str = "#,##0.00";
pub const COUNT_FORMAT: &str = "#,##0";
pub const PERCENT_FORMAT: &str = "0.00%";
pub const DATE_FORMAT: &str = "Short Date";

pub struct ExpressionSynthesizer {
    value_column_hints: Vec<String>,
    default_date: ColumnRef,
}

impl ExpressionSynthesizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            value_column_hints: config.value_column_hints.iter().map(|h| normalize(h)).collect(),
            default_date: ColumnRef::new(&config.default_date_table, &config.default_date_column),
        }
    }

    pub fn synthesize(
        &self,
        intent: &Intent,
        resolved: &[ResolvedEntity],
        catalog: &SchemaCatalog,
    ) -> Result<Expr> {
        let slots = intent.query_slots().ok_or_else(|| {
            AssistError::Synthesis(format!("a {} request has no expression", intent.kind()))
        })?;
        let subject = bound(resolved, SlotRole::Subject)
            .ok_or_else(|| AssistError::Synthesis("the request does not say what to measure".into()))?;

        let mut expr = self.base(slots, subject, catalog)?;

        for (i, filter) in slots.filters.iter().enumerate().rev() {
            let column = match bound(resolved, SlotRole::Filter(i)).map(|r| &r.entity) {
                Some(EntityRef::Column(c)) => c.clone(),
                _ => {
                    return Err(AssistError::Synthesis(format!(
                        "filter on '{}' is not bound to a column",
                        filter.column.text
                    )))
                }
            };
            let kind = catalog
                .column(&column)
                .map(|c| c.kind)
                .unwrap_or(DataKind::Text);
            expr = Expr::filter(
                Predicate {
                    value: Literal::typed_for(kind, &filter.value),
                    column,
                    op: filter.op,
                },
                expr,
            );
        }

        if let Some(window) = &slots.time_window {
            let date_column = subject
                .entity
                .table()
                .and_then(|t| catalog.canonical_date_column(t))
                .unwrap_or_else(|| self.default_date.clone());
            let kind = window.granularity.shift_kind();
            expr = match window.comparison {
                TimeComparison::PriorPeriod => Expr::time_shift(kind, date_column, expr),
                TimeComparison::Growth => Expr::growth(kind, date_column, expr),
            };
        }

        debug!("Synthesized {:?}", expr);
        Ok(expr)
    }

    fn base(&self, slots: &QuerySlots, subject: &ResolvedEntity, catalog: &SchemaCatalog) -> Result<Expr> {
        let aggregation = slots.aggregation.as_ref().map(|a| a.function);
        match &subject.entity {
            EntityRef::Measure(m) => Ok(Expr::measure(m.clone())),
            EntityRef::Column(c) => {
                let kind = catalog
                    .column(c)
                    .map(|d| d.kind)
                    .ok_or_else(|| AssistError::Synthesis(format!("unknown column {}", c)))?;
                let function = aggregation.unwrap_or(if kind == DataKind::Numeric {
                    AggregateFn::Sum
                } else {
                    AggregateFn::Count
                });
                Ok(Expr::aggregate(function, c.clone()))
            }
            EntityRef::Table(name) => {
                let table = catalog
                    .table(name)
                    .ok_or_else(|| AssistError::Synthesis(format!("unknown table '{}'", name)))?;
                match aggregation {
                    None | Some(AggregateFn::Count) | Some(AggregateFn::CountRows) | Some(AggregateFn::DistinctCount) => {
                        let first = table.columns.first().ok_or_else(|| {
                            AssistError::Synthesis(format!("table '{}' has no columns", table.name))
                        })?;
                        Ok(Expr::aggregate(
                            AggregateFn::CountRows,
                            ColumnRef::new(&table.name, &first.name),
                        ))
                    }
                    Some(function) => {
                        let column = self.value_column(table, subject)?;
                        Ok(Expr::aggregate(function, column))
                    }
                }
            }
            EntityRef::Role(r) => Err(AssistError::Synthesis(format!(
                "role '{}' cannot be aggregated",
                r
            ))),
        }
    }

    /// Column aggregated when a request names only a table: the single numeric
    /// column, else the first numeric column matching a value hint.
    fn value_column(&self, table: &TableDef, subject: &ResolvedEntity) -> Result<ColumnRef> {
        let numeric: Vec<_> = table
            .columns
            .iter()
            .filter(|c| c.kind == DataKind::Numeric)
            .collect();
        match numeric.as_slice() {
            [] => Err(AssistError::Synthesis(format!(
                "table '{}' has no numeric column to aggregate",
                table.name
            ))),
            [only] => Ok(ColumnRef::new(&table.name, &only.name)),
            _ => {
                for hint in &self.value_column_hints {
                    if let Some(c) = numeric.iter().find(|c| normalize(&c.name).contains(hint.as_str())) {
                        return Ok(ColumnRef::new(&table.name, &c.name));
                    }
                }
                Err(AmbiguityError {
                    text: subject.text.clone(),
                    role: SlotRole::Subject,
                    reason: AmbiguityReason::Tied,
                    candidates: numeric
                        .iter()
                        .map(|c| Candidate {
                            entity: EntityRef::Column(ColumnRef::new(&table.name, &c.name)),
                            score: subject.confidence,
                        })
                        .collect(),
                }
                .into())
            }
        }
    }

    /// Measure definition for a create-measure (or redefine) intent.
    pub fn measure_definition(
        &self,
        intent: &Intent,
        resolved: &[ResolvedEntity],
        catalog: &SchemaCatalog,
    ) -> Result<MeasureDef> {
        let Intent::CreateMeasure(slots) = intent else {
            return Err(AssistError::Synthesis(format!(
                "a {} request does not define a measure",
                intent.kind()
            )));
        };
        let expression = self.synthesize(intent, resolved, catalog)?;
        let format_string = format_string_for(&expression, catalog);

        if slots.redefine {
            return match bound(resolved, SlotRole::MeasureName).map(|r| &r.entity) {
                Some(EntityRef::Measure(m)) => {
                    let aliases = catalog.measure(m).map(|d| d.aliases.clone()).unwrap_or_default();
                    Ok(MeasureDef {
                        name: m.name.clone(),
                        table: m.table.clone(),
                        expression,
                        format_string,
                        aliases,
                    })
                }
                _ => Err(AssistError::Synthesis("no existing measure to redefine".into())),
            };
        }

        let table = owning_table(&expression, resolved)
            .ok_or_else(|| AssistError::Synthesis("cannot tell which table owns the measure".into()))?;
        let name = match explicit_name(slots) {
            Some(name) => name,
            None => unique_name(catalog, &table, &default_name(&expression)),
        };
        Ok(MeasureDef {
            name,
            table,
            expression,
            format_string,
            aliases: Vec::new(),
        })
    }
}

fn explicit_name(slots: &MeasureSlots) -> Option<String> {
    slots
        .measure_name
        .as_ref()
        .map(|s| s.text.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn owning_table(expr: &Expr, resolved: &[ResolvedEntity]) -> Option<String> {
    bound(resolved, SlotRole::Subject)
        .and_then(|s| s.entity.table())
        .or_else(|| expr.root_table())
        .map(str::to_string)
}

/// Deterministic display name for an expression.
pub fn default_name(expr: &Expr) -> String {
    match expr {
        Expr::Aggregate { function, column } => match function {
            AggregateFn::Sum => format!("Total {}", column.column),
            AggregateFn::Average => format!("Average {}", column.column),
            AggregateFn::Count => format!("Count of {}", column.column),
            AggregateFn::DistinctCount => format!("Distinct {}", column.column),
            AggregateFn::Min => format!("Min {}", column.column),
            AggregateFn::Max => format!("Max {}", column.column),
            AggregateFn::CountRows => format!("{} Count", column.table),
        },
        Expr::Measure { measure } => measure.name.clone(),
        Expr::Filter { predicate, child } => format!(
            "{} ({} {} {})",
            default_name(child),
            predicate.column.column,
            predicate.op.as_str(),
            predicate.value
        ),
        Expr::TimeShift { kind, child, .. } => format!("{} {}", default_name(child), kind.prior_label()),
        Expr::BinaryOp {
            op: BinaryOperator::Divide,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (
                Expr::BinaryOp {
                    op: BinaryOperator::Subtract,
                    left: current,
                    ..
                },
                Expr::TimeShift { kind, .. },
            ) => format!("{} {} %", default_name(current), kind.short_label()),
            _ => format!("{} / {}", default_name(left), default_name(right)),
        },
        Expr::BinaryOp { op, left, right } => {
            let symbol = match op {
                BinaryOperator::Add => "+",
                BinaryOperator::Subtract => "-",
                BinaryOperator::Multiply => "*",
                BinaryOperator::Divide => "/",
            };
            format!("{} {} {}", default_name(left), symbol, default_name(right))
        }
        Expr::Literal { value } => value.to_string(),
        Expr::Column { column } => column.column.clone(),
    }
}

/// `base`, or `base 2`, `base 3`, ... until free in the table's measure scope.
pub fn unique_name(catalog: &SchemaCatalog, table: &str, base: &str) -> String {
    let taken = |name: &str| {
        catalog
            .table(table)
            .map_or(false, |t| t.has_measure(name))
            || catalog.measures_of(table).any(|m| same_name(&m.name, name))
    };
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

pub fn format_string_for(expr: &Expr, catalog: &SchemaCatalog) -> String {
    match expr {
        Expr::Aggregate { function, column } => match function {
            AggregateFn::Count | AggregateFn::DistinctCount | AggregateFn::CountRows => {
                COUNT_FORMAT.to_string()
            }
            AggregateFn::Min | AggregateFn::Max
                if catalog.column(column).map(|c| c.kind) == Some(DataKind::Date) =>
            {
                DATE_FORMAT.to_string()
            }
            _ => AMOUNT_FORMAT.to_string(),
        },
        Expr::Measure { measure } => catalog
            .measure(measure)
            .map(|m| m.format_string.clone())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| AMOUNT_FORMAT.to_string()),
        Expr::Filter { child, .. } | Expr::TimeShift { child, .. } => format_string_for(child, catalog),
        Expr::BinaryOp {
            op: BinaryOperator::Divide,
            ..
        } => PERCENT_FORMAT.to_string(),
        Expr::BinaryOp { left, .. } => format_string_for(left, catalog),
        Expr::Literal { .. } | Expr::Column { .. } => AMOUNT_FORMAT.to_string(),
    }
}
