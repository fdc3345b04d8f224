//! DAX rendering
//!
//! Renders expression trees to DAX text for executors and committers that
//! speak DAX. Rendering is purely structural; callers render only validated
//! expressions.

use super::{AggregateFn, BinaryOperator, Expr, Literal, Predicate, TimeShiftKind};
use crate::catalog::ColumnRef;
use chrono::Datelike;

/// Turns an expression tree into the target engine's expression language.
pub trait ExpressionRenderer: Send + Sync {
    fn render(&self, expr: &Expr) -> String;

    /// A complete query returning the expression as a single value.
    fn render_query(&self, expr: &Expr) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DaxRenderer;

fn quote_table(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn column(c: &ColumnRef) -> String {
    format!("{}[{}]", quote_table(&c.table), c.column.replace(']', "]]"))
}

fn literal(value: &Literal) -> String {
    match value {
        Literal::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Literal::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Literal::Date(d) => format!("DATE({}, {}, {})", d.year(), d.month(), d.day()),
        Literal::Boolean(true) => "TRUE()".to_string(),
        Literal::Boolean(false) => "FALSE()".to_string(),
    }
}

fn predicate(p: &Predicate) -> String {
    format!("{} {} {}", column(&p.column), p.op.as_str(), literal(&p.value))
}

impl ExpressionRenderer for DaxRenderer {
    fn render(&self, expr: &Expr) -> String {
        match expr {
            Expr::Aggregate {
                function: AggregateFn::CountRows,
                column: c,
            } => format!("COUNTROWS({})", quote_table(&c.table)),
            Expr::Aggregate { function, column: c } => {
                format!("{}({})", function.dax_name(), column(c))
            }
            Expr::Filter { predicate: p, child } => {
                format!("CALCULATE({}, {})", self.render(child), predicate(p))
            }
            Expr::TimeShift {
                kind,
                date_column,
                child,
            } => {
                let shift = match kind {
                    TimeShiftKind::PriorYear => {
                        format!("SAMEPERIODLASTYEAR({})", column(date_column))
                    }
                    TimeShiftKind::PriorQuarter => {
                        format!("DATEADD({}, -1, QUARTER)", column(date_column))
                    }
                    TimeShiftKind::PriorMonth => {
                        format!("DATEADD({}, -1, MONTH)", column(date_column))
                    }
                };
                format!("CALCULATE({}, {})", self.render(child), shift)
            }
            Expr::BinaryOp {
                op: BinaryOperator::Divide,
                left,
                right,
            } => format!("DIVIDE({}, {})", self.render(left), self.render(right)),
            Expr::BinaryOp { op, left, right } => {
                let symbol = match op {
                    BinaryOperator::Add => "+",
                    BinaryOperator::Subtract => "-",
                    BinaryOperator::Multiply => "*",
                    BinaryOperator::Divide => "/",
                };
                format!("({} {} {})", self.render(left), symbol, self.render(right))
            }
            Expr::Literal { value } => literal(value),
            Expr::Column { column: c } => column(c),
            Expr::Measure { measure } => format!("[{}]", measure.name.replace(']', "]]")),
        }
    }

    fn render_query(&self, expr: &Expr) -> String {
        format!("EVALUATE ROW(\"Value\", {})", self.render(expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MeasureRef;
    use crate::expr::ComparisonOp;

    fn amount() -> Expr {
        Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
    }

    #[test]
    fn test_aggregates() {
        let r = DaxRenderer;
        assert_eq!(r.render(&amount()), "SUM('Sales'[Amount])");
        assert_eq!(
            r.render(&Expr::aggregate(AggregateFn::CountRows, ColumnRef::new("Sales", "OrderId"))),
            "COUNTROWS('Sales')"
        );
        assert_eq!(
            r.render(&Expr::aggregate(AggregateFn::DistinctCount, ColumnRef::new("Sales", "Region"))),
            "DISTINCTCOUNT('Sales'[Region])"
        );
    }

    #[test]
    fn test_filter_and_literals() {
        let expr = Expr::filter(
            Predicate {
                column: ColumnRef::new("Sales", "Region"),
                op: ComparisonOp::NotEq,
                value: Literal::Text("O\"Hare".into()),
            },
            amount(),
        );
        assert_eq!(
            DaxRenderer.render(&expr),
            "CALCULATE(SUM('Sales'[Amount]), 'Sales'[Region] <> \"O\"\"Hare\")"
        );
    }

    #[test]
    fn test_growth() {
        let expr = Expr::growth(TimeShiftKind::PriorYear, ColumnRef::new("Date", "Date"), amount());
        assert_eq!(
            DaxRenderer.render(&expr),
            "DIVIDE((SUM('Sales'[Amount]) - CALCULATE(SUM('Sales'[Amount]), SAMEPERIODLASTYEAR('Date'[Date]))), CALCULATE(SUM('Sales'[Amount]), SAMEPERIODLASTYEAR('Date'[Date])))"
        );
        let month = Expr::time_shift(
            TimeShiftKind::PriorMonth,
            ColumnRef::new("Date", "Date"),
            Expr::measure(MeasureRef::new("Sales", "Order Count")),
        );
        assert_eq!(
            DaxRenderer.render(&month),
            "CALCULATE([Order Count], DATEADD('Date'[Date], -1, MONTH))"
        );
    }

    #[test]
    fn test_query_wrapper() {
        assert_eq!(
            DaxRenderer.render_query(&amount()),
            "EVALUATE ROW(\"Value\", SUM('Sales'[Amount]))"
        );
    }
}
