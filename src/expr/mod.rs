//! Expression AST
//!
//! Structured form of a query or measure expression. Synthesis builds it,
//! validation checks it against the catalog, and a renderer paired with the
//! executor turns it into the engine's expression language.

pub mod render;
pub mod synth;

use crate::catalog::{same_name, ColumnRef, DataKind, MeasureRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use render::{DaxRenderer, ExpressionRenderer};
pub use synth::ExpressionSynthesizer;

/// Aggregate function applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Average,
    Count,
    DistinctCount,
    Min,
    Max,
    /// Counts the rows of the column's table
    CountRows,
}

impl AggregateFn {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "sum" => Some(AggregateFn::Sum),
            "average" | "avg" => Some(AggregateFn::Average),
            "count" => Some(AggregateFn::Count),
            "distinct_count" | "distinctcount" => Some(AggregateFn::DistinctCount),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            "count_rows" | "countrows" => Some(AggregateFn::CountRows),
            _ => None,
        }
    }

    /// Whether the function is meaningful over a column of `kind`.
    pub fn accepts(&self, kind: DataKind) -> bool {
        match self {
            AggregateFn::Sum | AggregateFn::Average => kind == DataKind::Numeric,
            AggregateFn::Min | AggregateFn::Max => {
                matches!(kind, DataKind::Numeric | DataKind::Date)
            }
            AggregateFn::Count | AggregateFn::DistinctCount | AggregateFn::CountRows => true,
        }
    }

    pub fn dax_name(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "SUM",
            AggregateFn::Average => "AVERAGE",
            AggregateFn::Count => "COUNT",
            AggregateFn::DistinctCount => "DISTINCTCOUNT",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::CountRows => "COUNTROWS",
        }
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dax_name())
    }
}

/// Prior-period function used by a time shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeShiftKind {
    PriorYear,
    PriorQuarter,
    PriorMonth,
}

impl TimeShiftKind {
    pub fn short_label(&self) -> &'static str {
        match self {
            TimeShiftKind::PriorYear => "YoY",
            TimeShiftKind::PriorQuarter => "QoQ",
            TimeShiftKind::PriorMonth => "MoM",
        }
    }

    pub fn prior_label(&self) -> &'static str {
        match self {
            TimeShiftKind::PriorYear => "PY",
            TimeShiftKind::PriorQuarter => "PQ",
            TimeShiftKind::PriorMonth => "PM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "=" | "==" | "is" | "equals" => Some(ComparisonOp::Eq),
            "!=" | "<>" | "is not" | "not equal to" => Some(ComparisonOp::NotEq),
            "<" => Some(ComparisonOp::Lt),
            "<=" => Some(ComparisonOp::LtEq),
            ">" => Some(ComparisonOp::Gt),
            ">=" => Some(ComparisonOp::GtEq),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
}

impl Literal {
    /// Type a raw request value according to the column it is compared with.
    /// Values that do not parse stay text, which the validator then reports.
    pub fn typed_for(kind: DataKind, raw: &str) -> Self {
        let raw = raw.trim().trim_matches(|c| c == '\'' || c == '"');
        match kind {
            DataKind::Numeric => raw
                .replace(',', "")
                .parse::<f64>()
                .map(Literal::Number)
                .unwrap_or_else(|_| Literal::Text(raw.to_string())),
            DataKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Literal::Date)
                .unwrap_or_else(|_| Literal::Text(raw.to_string())),
            DataKind::Boolean => match raw.to_lowercase().as_str() {
                "true" | "yes" => Literal::Boolean(true),
                "false" | "no" => Literal::Boolean(false),
                _ => Literal::Text(raw.to_string()),
            },
            DataKind::Text => Literal::Text(raw.to_string()),
        }
    }

    pub fn fits(&self, kind: DataKind) -> bool {
        match (self, kind) {
            (_, DataKind::Text) => true,
            (Literal::Number(_), DataKind::Numeric) => true,
            (Literal::Date(_), DataKind::Date) => true,
            (Literal::Boolean(_), DataKind::Boolean) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Text(s) => f.write_str(s),
            Literal::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Literal::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// `column op value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: ColumnRef,
    pub op: ComparisonOp,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Aggregate {
        function: AggregateFn,
        column: ColumnRef,
    },
    Filter {
        predicate: Predicate,
        child: Box<Expr>,
    },
    TimeShift {
        kind: TimeShiftKind,
        date_column: ColumnRef,
        child: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Literal {
        value: Literal,
    },
    Column {
        column: ColumnRef,
    },
    Measure {
        measure: MeasureRef,
    },
}

impl Expr {
    pub fn aggregate(function: AggregateFn, column: ColumnRef) -> Self {
        Expr::Aggregate { function, column }
    }

    pub fn filter(predicate: Predicate, child: Expr) -> Self {
        Expr::Filter {
            predicate,
            child: Box::new(child),
        }
    }

    pub fn time_shift(kind: TimeShiftKind, date_column: ColumnRef, child: Expr) -> Self {
        Expr::TimeShift {
            kind,
            date_column,
            child: Box::new(child),
        }
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn measure(measure: MeasureRef) -> Self {
        Expr::Measure { measure }
    }

    /// `(current - prior) / prior`
    pub fn growth(kind: TimeShiftKind, date_column: ColumnRef, current: Expr) -> Self {
        let prior = Expr::time_shift(kind, date_column, current.clone());
        Expr::binary(
            BinaryOperator::Divide,
            Expr::binary(BinaryOperator::Subtract, current, prior.clone()),
            prior,
        )
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Filter { child, .. } | Expr::TimeShift { child, .. } => child.visit(f),
            Expr::BinaryOp { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Aggregate { .. } | Expr::Literal { .. } | Expr::Column { .. } | Expr::Measure { .. } => {}
        }
    }

    fn visit_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        f(self);
        match self {
            Expr::Filter { child, .. } | Expr::TimeShift { child, .. } => child.visit_mut(f),
            Expr::BinaryOp { left, right, .. } => {
                left.visit_mut(f);
                right.visit_mut(f);
            }
            Expr::Aggregate { .. } | Expr::Literal { .. } | Expr::Column { .. } | Expr::Measure { .. } => {}
        }
    }

    /// Every column the expression touches, in traversal order.
    pub fn column_refs(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.visit(&mut |e| match e {
            Expr::Aggregate { column, .. } | Expr::Column { column } => out.push(column.clone()),
            Expr::Filter { predicate, .. } => out.push(predicate.column.clone()),
            Expr::TimeShift { date_column, .. } => out.push(date_column.clone()),
            _ => {}
        });
        out
    }

    pub fn measure_refs(&self) -> Vec<MeasureRef> {
        let mut out: Vec<MeasureRef> = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Measure { measure } = e {
                if !out.iter().any(|m| m.matches(measure)) {
                    out.push(measure.clone());
                }
            }
        });
        out
    }

    /// Table the expression is evaluated over: the first aggregated column or
    /// measure reached without going through a time-shift date column.
    pub fn root_table(&self) -> Option<&str> {
        match self {
            Expr::Aggregate { column, .. } | Expr::Column { column } => Some(&column.table),
            Expr::Measure { measure } => Some(&measure.table),
            Expr::Filter { child, .. } | Expr::TimeShift { child, .. } => child.root_table(),
            Expr::BinaryOp { left, right, .. } => left.root_table().or_else(|| right.root_table()),
            Expr::Literal { .. } => None,
        }
    }

    pub fn rename_table(&mut self, from: &str, to: &str) {
        let rename = |c: &mut ColumnRef| {
            if same_name(&c.table, from) {
                c.table = to.to_string();
            }
        };
        self.visit_mut(&mut |e| match e {
            Expr::Aggregate { column, .. } | Expr::Column { column } => rename(column),
            Expr::Filter { predicate, .. } => rename(&mut predicate.column),
            Expr::TimeShift { date_column, .. } => rename(date_column),
            Expr::Measure { measure } => {
                if same_name(&measure.table, from) {
                    measure.table = to.to_string();
                }
            }
            _ => {}
        });
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) {
        let rename = |c: &mut ColumnRef| {
            if same_name(&c.table, table) && same_name(&c.column, from) {
                c.column = to.to_string();
            }
        };
        self.visit_mut(&mut |e| match e {
            Expr::Aggregate { column, .. } | Expr::Column { column } => rename(column),
            Expr::Filter { predicate, .. } => rename(&mut predicate.column),
            Expr::TimeShift { date_column, .. } => rename(date_column),
            _ => {}
        });
    }

    pub fn rename_measure(&mut self, table: &str, from: &str, to: &str) {
        self.visit_mut(&mut |e| {
            if let Expr::Measure { measure } = e {
                if same_name(&measure.table, table) && same_name(&measure.name, from) {
                    measure.name = to.to_string();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_amount() -> ColumnRef {
        ColumnRef::new("Sales", "Amount")
    }

    #[test]
    fn test_growth_shape() {
        let base = Expr::aggregate(AggregateFn::Sum, sales_amount());
        let expr = Expr::growth(TimeShiftKind::PriorYear, ColumnRef::new("Date", "Date"), base);
        match &expr {
            Expr::BinaryOp { op: BinaryOperator::Divide, left, right } => {
                assert!(matches!(**right, Expr::TimeShift { .. }));
                assert!(matches!(**left, Expr::BinaryOp { op: BinaryOperator::Subtract, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(expr.root_table(), Some("Sales"));
    }

    #[test]
    fn test_rename_table_reaches_every_reference() {
        let mut expr = Expr::filter(
            Predicate {
                column: ColumnRef::new("Sales", "Region"),
                op: ComparisonOp::Eq,
                value: Literal::Text("East".into()),
            },
            Expr::binary(
                BinaryOperator::Add,
                Expr::aggregate(AggregateFn::Sum, sales_amount()),
                Expr::measure(MeasureRef::new("Sales", "Order Count")),
            ),
        );
        expr.rename_table("sales", "Orders");
        assert!(expr.column_refs().iter().all(|c| c.table == "Orders"));
        assert_eq!(expr.measure_refs()[0].table, "Orders");
    }

    #[test]
    fn test_aggregate_compatibility() {
        assert!(!AggregateFn::Sum.accepts(DataKind::Text));
        assert!(AggregateFn::Max.accepts(DataKind::Date));
        assert!(AggregateFn::DistinctCount.accepts(DataKind::Text));
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(Literal::typed_for(DataKind::Numeric, "1,200"), Literal::Number(1200.0));
        assert_eq!(
            Literal::typed_for(DataKind::Date, "2024-03-01"),
            Literal::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(Literal::typed_for(DataKind::Numeric, "'East'"), Literal::Text("East".into()));
    }
}
