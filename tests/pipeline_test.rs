use serde_json::json;
use tabular_copilot::catalog::{CatalogEdit, ColumnRef, SchemaView};
use tabular_copilot::clarification::ClarificationKind;
use tabular_copilot::error::ValidationError;
use tabular_copilot::expr::{AggregateFn, ComparisonOp, Expr, Literal, Predicate, TimeShiftKind};
use tabular_copilot::intent::{Classifier, IntentKind, RuleClassifier};
use tabular_copilot::resolver::EntityResolver;
use tabular_copilot::validator::Validator;
use tabular_copilot::{AssistError, Assistant, EngineConfig, Outcome, SchemaCatalog, SchemaSnapshot};

const SAMPLE_MODEL: &str = include_str!("../demos/sample_model.json");

fn sample_catalog() -> SchemaCatalog {
    let snapshot: SchemaSnapshot = serde_json::from_str(SAMPLE_MODEL).unwrap();
    SchemaCatalog::from_snapshot(snapshot).unwrap()
}

fn assistant() -> Assistant {
    Assistant::new(EngineConfig::default()).unwrap()
}

#[test]
fn show_total_sales() {
    let catalog = sample_catalog();
    match assistant().interpret("Show total sales", &catalog).unwrap() {
        Outcome::Query { intent, expression, .. } => {
            assert_eq!(intent, IntentKind::Query);
            assert_eq!(
                expression.expr(),
                &Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
            );
            assert_eq!(expression.catalog_version(), 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn create_measure_for_average_sales() {
    let catalog = sample_catalog();
    match assistant()
        .interpret("Create a measure for average sales", &catalog)
        .unwrap()
    {
        Outcome::Measure { measure, dax, plan } => {
            assert_eq!(measure.name, "Average Amount");
            assert_eq!(measure.table, "Sales");
            assert_eq!(
                measure.expression,
                Expr::aggregate(AggregateFn::Average, ColumnRef::new("Sales", "Amount"))
            );
            assert_eq!(measure.format_string, "#,##0.00");
            assert_eq!(dax, "AVERAGE('Sales'[Amount])");
            assert_eq!(plan.steps.len(), 1);
            assert!(matches!(plan.steps[0].edit, CatalogEdit::InsertMeasure { .. }));

            let mut after = catalog.clone();
            after.apply_plan(&plan).unwrap();
            assert!(after.table("Sales").unwrap().has_measure("Average Amount"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn yoy_growth_without_reachable_date_is_rejected() {
    let catalog = sample_catalog();
    let err = assistant()
        .interpret("Show YoY growth of Revenue", &catalog)
        .unwrap_err();
    match err {
        AssistError::Validation(errors) => {
            assert_eq!(
                errors,
                vec![ValidationError::MissingDateRelationship {
                    date_column: ColumnRef::new("Date", "Date"),
                    root_table: "Finance".into(),
                }]
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn yoy_growth_over_related_table() {
    let catalog = sample_catalog();
    match assistant()
        .interpret("Show YoY growth of Amount", &catalog)
        .unwrap()
    {
        Outcome::Query { intent, expression, dax } => {
            assert_eq!(intent, IntentKind::TimeIntelligenceQuery);
            assert_eq!(
                expression.expr(),
                &Expr::growth(
                    TimeShiftKind::PriorYear,
                    ColumnRef::new("Date", "Date"),
                    Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
                )
            );
            assert!(dax.contains("SAMEPERIODLASTYEAR('Date'[Date])"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn misspelt_table_is_autocorrected() {
    let catalog = sample_catalog();
    match assistant()
        .interpret("List all columns in the Sles table", &catalog)
        .unwrap()
    {
        Outcome::Schema {
            view: SchemaView::Columns { table, columns },
        } => {
            assert_eq!(table, "Sales");
            assert_eq!(columns.len(), 6);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn tied_columns_ask_for_clarification() {
    let snapshot: SchemaSnapshot = serde_json::from_value(json!({
        "tables": [{
            "name": "Sales",
            "columns": [
                { "name": "SalesAmount", "kind": "numeric" },
                { "name": "TaxAmount", "kind": "numeric" }
            ]
        }]
    }))
    .unwrap();
    let catalog = SchemaCatalog::from_snapshot(snapshot).unwrap();
    match assistant().interpret("Show total amount", &catalog).unwrap() {
        Outcome::Clarification { request } => {
            assert_eq!(request.kind, ClarificationKind::Entity);
            assert_eq!(request.original_text, "Show total amount");
            let ids: Vec<&str> = request.options.iter().map(|o| o.id.as_str()).collect();
            assert_eq!(ids, vec!["'Sales'[SalesAmount]", "'Sales'[TaxAmount]"]);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn filters_are_typed_by_column() {
    let catalog = sample_catalog();
    match assistant()
        .interpret("Show total Amount where Region = East", &catalog)
        .unwrap()
    {
        Outcome::Query { expression, dax, .. } => {
            assert_eq!(
                expression.expr(),
                &Expr::filter(
                    Predicate {
                        column: ColumnRef::new("Sales", "Region"),
                        op: ComparisonOp::Eq,
                        value: Literal::Text("East".into()),
                    },
                    Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
                )
            );
            assert_eq!(
                dax,
                "EVALUATE ROW(\"Value\", CALCULATE(SUM('Sales'[Amount]), 'Sales'[Region] = \"East\"))"
            );
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn interpretation_is_deterministic() {
    let catalog = sample_catalog();
    let assistant = assistant();
    for request in [
        "Show total sales",
        "Show YoY growth of Amount",
        "Create a measure for average sales",
        "Show total Amount where Region = East",
    ] {
        let first = assistant.interpret(request, &catalog).unwrap();
        let second = assistant.interpret(request, &catalog).unwrap();
        match (first, second) {
            (Outcome::Measure { measure: a, .. }, Outcome::Measure { measure: b, .. }) => {
                assert_eq!(a, b)
            }
            (a, b) => assert_eq!(a, b),
        }
    }
}

#[test]
fn synthesized_queries_validate() {
    let catalog = sample_catalog();
    let config = EngineConfig::default();
    let classifier = RuleClassifier::new(&config);
    let resolver = EntityResolver::new(&config);
    let synthesizer = tabular_copilot::expr::ExpressionSynthesizer::new(&config);
    for request in [
        "Show total sales",
        "Show average Quantity",
        "Show count of OrderId",
        "Show max Price",
        "Show previous year Amount",
        "Show MoM growth of Quantity",
    ] {
        let classification = classifier.classify(request, Some(&catalog));
        let resolved = resolver
            .resolve(&classification.intent.name_slots(), &catalog)
            .unwrap_or_else(|e| panic!("{}: {}", request, e));
        let expr = synthesizer
            .synthesize(&classification.intent, &resolved, &catalog)
            .unwrap_or_else(|e| panic!("{}: {}", request, e));
        assert!(
            Validator::new().validate(&expr, &catalog).is_ok(),
            "{} produced an invalid expression {:?}",
            request,
            expr
        );
    }
}

#[test]
fn unknown_column_reference_is_reported() {
    let catalog = sample_catalog();
    let ghost = ColumnRef::new("Sales", "Margin");
    let expr = Expr::filter(
        Predicate {
            column: ghost.clone(),
            op: ComparisonOp::Gt,
            value: Literal::Number(0.0),
        },
        Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount")),
    );
    let errors = Validator::new().validate(&expr, &catalog).unwrap_err();
    assert!(errors.contains(&ValidationError::UnknownColumn { column: ghost }));
}

#[test]
fn model_mutation_is_planned_not_applied() {
    let catalog = sample_catalog();
    match assistant()
        .interpret("Rename table Finance to Ledger", &catalog)
        .unwrap()
    {
        Outcome::Mutation { plan } => {
            assert_eq!(plan.base_version, 1);
            assert_eq!(
                plan.steps[0].edit,
                CatalogEdit::RenameTable {
                    from: "Finance".into(),
                    to: "Ledger".into()
                }
            );
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(catalog.table("Finance").is_some());
}

#[test]
fn yoy_growth_without_any_date_table_is_rejected() {
    let snapshot: SchemaSnapshot = serde_json::from_value(json!({
        "tables": [{
            "name": "Finance",
            "columns": [
                { "name": "Period", "kind": "text" },
                { "name": "Revenue", "kind": "numeric" }
            ]
        }]
    }))
    .unwrap();
    let catalog = SchemaCatalog::from_snapshot(snapshot).unwrap();
    match assistant().interpret("Show YoY growth of Revenue", &catalog) {
        Err(AssistError::Validation(errors)) => {
            assert!(errors.contains(&ValidationError::MissingDateRelationship {
                date_column: ColumnRef::new("Date", "Date"),
                root_table: "Finance".into(),
            }));
        }
        other => panic!("unexpected result {:?}", other),
    }
}
