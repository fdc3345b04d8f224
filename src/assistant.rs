//! Request pipeline
//!
//! classify -> resolve -> synthesize -> validate (or plan), against one
//! consistent catalog snapshot. Everything up to a commit is side-effect free
//! and can be abandoned at any point. The connection session owns the shared
//! catalog store and the schema provider it was built from.

use crate::catalog::{same_name, CatalogStore, DataKind, ExploreScope, MeasureDef, SchemaCatalog, SchemaView};
use crate::clarification::ClarificationRequest;
use crate::collaborators::{ExpressionExecutor, JsonFileSchemaProvider, ModelCommitter, SchemaProvider};
use crate::config::EngineConfig;
use crate::error::{AssistError, PlanError, Result};
use crate::expr::{DaxRenderer, ExpressionRenderer, ExpressionSynthesizer};
use crate::intent::{
    Classification, Classifier, ConnectionAction, ConnectionSlots, Intent, IntentKind, RuleClassifier,
    SlotRole,
};
use crate::planner::{MutationPlan, MutationPlanner, MutationRequest};
use crate::resolver::{bound, EntityResolver, ResolvedEntity};
use crate::validator::{ValidatedExpression, Validator};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What a request turned into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Query {
        intent: IntentKind,
        expression: ValidatedExpression,
        dax: String,
    },
    Measure {
        measure: MeasureDef,
        dax: String,
        plan: MutationPlan,
    },
    Schema {
        view: SchemaView,
    },
    Mutation {
        plan: MutationPlan,
    },
    /// A connection request; [`Assistant::handle`] carries it out.
    ConnectionRequested {
        slots: ConnectionSlots,
    },
    Connection {
        status: ConnectionStatus,
    },
    Diagnosis {
        symptom: Option<String>,
        findings: Vec<String>,
    },
    Clarification {
        request: ClarificationRequest,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub source: Option<String>,
    pub catalog_version: Option<u64>,
    pub tables: usize,
    pub measures: usize,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            connected: false,
            source: None,
            catalog_version: None,
            tables: 0,
            measures: 0,
        }
    }
}

struct Session {
    provider: Arc<dyn SchemaProvider>,
    store: Arc<CatalogStore>,
}

pub struct Assistant {
    config: EngineConfig,
    classifier: Box<dyn Classifier>,
    resolver: EntityResolver,
    synthesizer: ExpressionSynthesizer,
    validator: Validator,
    planner: MutationPlanner,
    renderer: Box<dyn ExpressionRenderer>,
    session: RwLock<Option<Session>>,
}

impl Assistant {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let classifier = Box::new(RuleClassifier::new(&config));
        Ok(Self::with_classifier(config, classifier))
    }

    /// Swap in a different classifier; the rest of the pipeline is unchanged.
    pub fn with_classifier(config: EngineConfig, classifier: Box<dyn Classifier>) -> Self {
        info!("Assistant using '{}' classifier", classifier.name());
        Self {
            resolver: EntityResolver::new(&config),
            synthesizer: ExpressionSynthesizer::new(&config),
            validator: Validator::new(),
            planner: MutationPlanner::new(),
            renderer: Box::new(DaxRenderer),
            classifier,
            config,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- connection session ----

    pub async fn connect(&self, provider: Arc<dyn SchemaProvider>) -> Result<ConnectionStatus> {
        let store = CatalogStore::connect(provider.as_ref()).await?;
        let mut session = self.session.write().await;
        if session.is_some() {
            info!("Replacing existing connection");
        }
        *session = Some(Session {
            provider,
            store: Arc::new(store),
        });
        drop(session);
        Ok(self.status().await)
    }

    pub async fn refresh(&self) -> Result<ConnectionStatus> {
        {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(AssistError::NotConnected)?;
            session.store.refresh(session.provider.as_ref()).await?;
        }
        Ok(self.status().await)
    }

    pub async fn disconnect(&self) -> ConnectionStatus {
        if self.session.write().await.take().is_some() {
            info!("Disconnected; catalog dropped");
        }
        ConnectionStatus::disconnected()
    }

    pub async fn status(&self) -> ConnectionStatus {
        let session = self.session.read().await;
        match session.as_ref() {
            None => ConnectionStatus::disconnected(),
            Some(s) => {
                let catalog = s.store.read().await;
                ConnectionStatus {
                    connected: true,
                    source: Some(s.provider.describe()),
                    catalog_version: Some(catalog.version()),
                    tables: catalog.tables().len(),
                    measures: catalog.measures().len(),
                }
            }
        }
    }

    async fn store(&self) -> Option<Arc<CatalogStore>> {
        self.session.read().await.as_ref().map(|s| Arc::clone(&s.store))
    }

    /// Owned copy of the current catalog, if connected.
    pub async fn catalog(&self) -> Option<SchemaCatalog> {
        match self.store().await {
            Some(store) => Some(store.snapshot().await),
            None => None,
        }
    }

    // ---- requests ----

    /// Full handling of a request, including connection management.
    pub async fn handle(&self, text: &str) -> Result<Outcome> {
        let catalog = self.catalog().await;
        let classification = self.classifier.classify(text, catalog.as_ref());
        if let Intent::ConnectionManagement(slots) = &classification.intent {
            if classification.confidence >= self.config.min_intent_confidence {
                return self.manage_connection(slots, text).await;
            }
        }
        let catalog = catalog.ok_or(AssistError::NotConnected)?;
        self.interpret_classified(classification, &catalog)
    }

    /// Interpret `text` against `catalog` without touching any shared state.
    pub fn interpret(&self, text: &str, catalog: &SchemaCatalog) -> Result<Outcome> {
        let classification = self.classifier.classify(text, Some(catalog));
        self.interpret_classified(classification, catalog)
    }

    fn interpret_classified(&self, classification: Classification, catalog: &SchemaCatalog) -> Result<Outcome> {
        info!(
            "Request '{}' classified as {} ({:.2})",
            classification.text,
            classification.kind(),
            classification.confidence
        );
        if classification.confidence < self.config.min_intent_confidence {
            debug!("Confidence below {:.2}, asking back", self.config.min_intent_confidence);
            return Ok(clarify(ClarificationRequest::low_confidence(&classification)));
        }

        let text = classification.text.as_str();
        let intent = &classification.intent;
        let resolved = match self.resolver.resolve(&intent.name_slots(), catalog) {
            Ok(resolved) => resolved,
            Err(ambiguity) => return Ok(clarify(ClarificationRequest::from_ambiguity(&ambiguity, text))),
        };

        let outcome = match intent {
            Intent::Query(slots) | Intent::TimeIntelligenceQuery(slots) => {
                if slots.subject.is_none() {
                    return Ok(clarify(ClarificationRequest::missing("what to measure", text)));
                }
                let expr = match self.synthesizer.synthesize(intent, &resolved, catalog) {
                    Ok(expr) => expr,
                    Err(AssistError::Ambiguity(a)) => {
                        return Ok(clarify(ClarificationRequest::from_ambiguity(&a, text)))
                    }
                    Err(e) => return Err(e),
                };
                let expression = self.validator.validate(&expr, catalog).map_err(AssistError::Validation)?;
                Outcome::Query {
                    intent: intent.kind(),
                    dax: self.renderer.render_query(expression.expr()),
                    expression,
                }
            }
            Intent::CreateMeasure(slots) => {
                if slots.query.subject.is_none() {
                    return Ok(clarify(ClarificationRequest::missing("what the measure computes", text)));
                }
                let measure = match self.synthesizer.measure_definition(intent, &resolved, catalog) {
                    Ok(measure) => measure,
                    Err(AssistError::Ambiguity(a)) => {
                        return Ok(clarify(ClarificationRequest::from_ambiguity(&a, text)))
                    }
                    Err(e) => return Err(e),
                };
                self.validator
                    .validate_measure(&measure, catalog)
                    .map_err(AssistError::Validation)?;
                let request = if slots.redefine {
                    MutationRequest::RedefineMeasure {
                        measure: measure.clone(),
                    }
                } else {
                    MutationRequest::CreateMeasure {
                        measure: measure.clone(),
                    }
                };
                let plan = self.planner.plan(&request, catalog)?;
                Outcome::Measure {
                    dax: self.renderer.render(&measure.expression),
                    measure,
                    plan,
                }
            }
            Intent::ExploreSchema(slots) => {
                let table = bound(&resolved, SlotRole::ExploreTarget).and_then(|r| r.entity.table());
                if slots.scope == ExploreScope::Columns && table.is_none() {
                    return Ok(clarify(ClarificationRequest::missing("which table to list columns for", text)));
                }
                Outcome::Schema {
                    view: catalog.describe(slots.scope, table)?,
                }
            }
            Intent::ModelMutation(slots) => {
                let request = match MutationRequest::from_slots(slots, &resolved) {
                    Ok(request) => request,
                    Err(PlanError::MissingSlot(what)) => {
                        return Ok(clarify(ClarificationRequest::missing(what, text)))
                    }
                    Err(e) => return Err(e.into()),
                };
                Outcome::Mutation {
                    plan: self.planner.plan(&request, catalog)?,
                }
            }
            Intent::ConnectionManagement(slots) => Outcome::ConnectionRequested { slots: slots.clone() },
            Intent::Troubleshooting(slots) => Outcome::Diagnosis {
                symptom: slots.symptom.clone(),
                findings: diagnose(catalog),
            },
        };
        log_resolution(&resolved);
        Ok(outcome)
    }

    async fn manage_connection(&self, slots: &ConnectionSlots, text: &str) -> Result<Outcome> {
        let status = match slots.action {
            ConnectionAction::Connect => {
                let provider: Arc<dyn SchemaProvider> = match &slots.target {
                    Some(target) => Arc::new(JsonFileSchemaProvider::new(target)),
                    None => match self.session.read().await.as_ref() {
                        Some(s) => Arc::clone(&s.provider),
                        None => {
                            return Ok(clarify(ClarificationRequest::missing("which model to connect to", text)))
                        }
                    },
                };
                self.connect(provider).await?
            }
            ConnectionAction::Refresh => self.refresh().await?,
            ConnectionAction::Disconnect => self.disconnect().await,
            ConnectionAction::Status => self.status().await,
        };
        Ok(Outcome::Connection { status })
    }

    /// Commit a plan from [`Outcome::Mutation`] or [`Outcome::Measure`].
    pub async fn commit(&self, plan: MutationPlan, committer: Arc<dyn ModelCommitter>) -> Result<u64> {
        let store = self.store().await.ok_or(AssistError::NotConnected)?;
        store.commit(plan, committer).await
    }

    /// Forward a validated expression to the executor. Expressions validated
    /// against an older catalog are checked again first.
    pub async fn execute(
        &self,
        expression: &ValidatedExpression,
        executor: &dyn ExpressionExecutor,
    ) -> Result<Vec<Value>> {
        let store = self.store().await.ok_or(AssistError::NotConnected)?;
        let current = store.snapshot().await;
        let expression = if expression.catalog_version() == current.version() {
            expression.clone()
        } else {
            warn!(
                "Expression was validated against catalog v{}, now v{}; revalidating",
                expression.catalog_version(),
                current.version()
            );
            self.validator
                .validate(expression.expr(), &current)
                .map_err(AssistError::Validation)?
        };
        debug!("Executing {}", executor.render(&expression));
        Ok(executor.execute(&expression).await?)
    }
}

fn clarify(request: ClarificationRequest) -> Outcome {
    info!("Asking for clarification: {}", request.question);
    Outcome::Clarification { request }
}

fn log_resolution(resolved: &[ResolvedEntity]) {
    for r in resolved {
        debug!("  {} '{}' -> {} ({:.2})", r.role, r.text, r.entity, r.confidence);
    }
}

/// Model health checks reported for troubleshooting requests.
pub fn diagnose(catalog: &SchemaCatalog) -> Vec<String> {
    let mut findings = Vec::new();
    let several_tables = catalog.tables().len() > 1;
    for table in catalog.tables() {
        if several_tables && catalog.active_neighbours(&table.name).is_empty() {
            findings.push(format!(
                "Table '{}' has no active relationship to any other table",
                table.name
            ));
        }
        let has_numeric = table.columns.iter().any(|c| c.kind == DataKind::Numeric);
        if has_numeric && !table.is_date_table && catalog.canonical_date_column(&table.name).is_none() {
            findings.push(format!(
                "Table '{}' has no reachable date column; time intelligence over it will fail",
                table.name
            ));
        }
    }
    for rel in catalog.relationships().iter().filter(|r| !r.active) {
        findings.push(format!("Relationship {} is inactive", rel));
    }
    for measure in catalog.measures() {
        if measure.format_string.trim().is_empty() {
            findings.push(format!("Measure {} has no format string", measure.measure_ref()));
        }
    }
    let date_tables: Vec<&str> = catalog
        .tables()
        .iter()
        .filter(|t| t.is_date_table)
        .map(|t| t.name.as_str())
        .collect();
    if date_tables.is_empty() {
        findings.push("No table is marked as a date table".to_string());
    }
    for role in catalog.roles() {
        for filter in &role.table_filters {
            if !catalog.tables().iter().any(|t| same_name(&t.name, &filter.table)) {
                findings.push(format!("Role '{}' filters unknown table '{}'", role.name, filter.table));
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::sample_catalog;
    use crate::catalog::ColumnRef;
    use crate::clarification::ClarificationKind;
    use crate::collaborators::InMemorySchemaProvider;
    use crate::expr::{AggregateFn, Expr};

    fn assistant() -> Assistant {
        Assistant::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_query_outcome_carries_dax() {
        let catalog = sample_catalog();
        match assistant().interpret("Show total sales", &catalog).unwrap() {
            Outcome::Query { intent, expression, dax } => {
                assert_eq!(intent, IntentKind::Query);
                assert_eq!(
                    expression.expr(),
                    &Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount"))
                );
                assert_eq!(dax, "EVALUATE ROW(\"Value\", SUM('Sales'[Amount]))");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gibberish_asks_back() {
        let catalog = sample_catalog();
        match assistant().interpret("qwzx plmk", &catalog).unwrap() {
            Outcome::Clarification { request } => assert_eq!(request.kind, ClarificationKind::Intent),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_diagnose_sample_model() {
        let findings = diagnose(&sample_catalog());
        assert_eq!(
            findings,
            vec![
                "Table 'Finance' has no active relationship to any other table".to_string(),
                "Table 'Finance' has no reachable date column; time intelligence over it will fail"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_requests_need_a_connection() {
        let assistant = assistant();
        let err = assistant.handle("Show total sales").await.unwrap_err();
        assert!(matches!(err, AssistError::NotConnected));

        let provider = Arc::new(InMemorySchemaProvider::new(sample_catalog().to_snapshot()));
        let status = assistant.connect(provider).await.unwrap();
        assert!(status.connected);
        assert_eq!(status.tables, 4);
        assert!(matches!(
            assistant.handle("Show total sales").await.unwrap(),
            Outcome::Query { .. }
        ));

        match assistant.handle("disconnect from the model").await.unwrap() {
            Outcome::Connection { status } => assert!(!status.connected),
            other => panic!("unexpected {:?}", other),
        }
        assert!(assistant.catalog().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_bumps_version() {
        let assistant = assistant();
        let provider = Arc::new(InMemorySchemaProvider::new(sample_catalog().to_snapshot()));
        assistant.connect(provider).await.unwrap();
        match assistant.handle("refresh the model").await.unwrap() {
            Outcome::Connection { status } => assert_eq!(status.catalog_version, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
