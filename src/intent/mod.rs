//! Intents and Slots
//!
//! A request is classified into one operation intent carrying the raw slot
//! values pulled out of the text. Slots are unresolved strings with a
//! confidence; binding them to catalog objects is the resolver's job.

pub mod classifier;
pub mod slots;

use crate::catalog::{Cardinality, CrossFilterDirection, DataKind, ExploreScope, ModelPermission};
use crate::expr::{AggregateFn, ComparisonOp, TimeShiftKind};
use serde::Serialize;
use std::fmt;

pub use classifier::{Classification, Classifier, IntentScore, RuleClassifier};

/// Operation intents, listed in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ConnectionManagement,
    ModelMutation,
    CreateMeasure,
    TimeIntelligenceQuery,
    Query,
    ExploreSchema,
    Troubleshooting,
}

impl IntentKind {
    /// Lower is preferred on equal scores.
    pub fn priority(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentKind::ConnectionManagement => "connection management",
            IntentKind::ModelMutation => "model mutation",
            IntentKind::CreateMeasure => "create measure",
            IntentKind::TimeIntelligenceQuery => "time intelligence query",
            IntentKind::Query => "query",
            IntentKind::ExploreSchema => "explore schema",
            IntentKind::Troubleshooting => "troubleshooting",
        };
        f.write_str(s)
    }
}

/// Raw extracted text plus how sure the extractor was about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    pub text: String,
    pub confidence: f64,
}

impl Slot {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationSlot {
    pub text: String,
    pub function: AggregateFn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSlot {
    pub column: Slot,
    pub op: ComparisonOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Year,
    Quarter,
    Month,
}

impl TimeGranularity {
    pub fn shift_kind(&self) -> TimeShiftKind {
        match self {
            TimeGranularity::Year => TimeShiftKind::PriorYear,
            TimeGranularity::Quarter => TimeShiftKind::PriorQuarter,
            TimeGranularity::Month => TimeShiftKind::PriorMonth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeComparison {
    /// Value for the shifted period only ("last year's sales")
    PriorPeriod,
    /// `(current - prior) / prior`
    Growth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeWindow {
    pub granularity: TimeGranularity,
    pub comparison: TimeComparison,
    pub text: String,
}

/// Slots shared by data queries and measure definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuerySlots {
    pub aggregation: Option<AggregationSlot>,
    /// What is being measured: a column, a measure or a table
    pub subject: Option<Slot>,
    pub table_hint: Option<Slot>,
    /// Subject came from `Table[Column]` syntax and must not be searched elsewhere
    pub explicit: bool,
    pub filters: Vec<FilterSlot>,
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureSlots {
    pub query: QuerySlots,
    pub measure_name: Option<Slot>,
    /// Replace the expression of an existing measure instead of adding one
    pub redefine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExploreSlots {
    pub scope: ExploreScope,
    pub target: Option<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Add,
    Rename,
    Remove,
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelObject {
    Table,
    Column,
    Measure,
    Relationship,
    Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSlot {
    pub table: Slot,
    pub column: Option<Slot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpecSlot {
    pub name: String,
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationSlots {
    pub action: MutationAction,
    pub object: ModelObject,
    /// Object being renamed/removed, or the name of the object being added
    pub target: Option<Slot>,
    /// Owning table for columns and measures
    pub parent: Option<Slot>,
    pub new_name: Option<Slot>,
    pub from: Option<EndpointSlot>,
    pub to: Option<EndpointSlot>,
    pub columns: Vec<ColumnSpecSlot>,
    pub data_kind: Option<DataKind>,
    pub cardinality: Option<Cardinality>,
    pub cross_filter: Option<CrossFilterDirection>,
    pub active: Option<bool>,
    pub permission: Option<ModelPermission>,
}

impl MutationSlots {
    pub fn new(action: MutationAction, object: ModelObject) -> Self {
        Self {
            action,
            object,
            target: None,
            parent: None,
            new_name: None,
            from: None,
            to: None,
            columns: Vec::new(),
            data_kind: None,
            cardinality: None,
            cross_filter: None,
            active: None,
            permission: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Connect,
    Disconnect,
    Refresh,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSlots {
    pub action: ConnectionAction,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TroubleshootingSlots {
    pub text: String,
    pub symptom: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Query(QuerySlots),
    CreateMeasure(MeasureSlots),
    ExploreSchema(ExploreSlots),
    ModelMutation(MutationSlots),
    TimeIntelligenceQuery(QuerySlots),
    ConnectionManagement(ConnectionSlots),
    Troubleshooting(TroubleshootingSlots),
}

/// Which part of an intent a name-like slot fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    Subject,
    TableHint,
    Filter(usize),
    MeasureName,
    ExploreTarget,
    MutationTarget,
    MutationParent,
    FromTable,
    FromColumn,
    ToTable,
    ToColumn,
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRole::Subject => f.write_str("subject"),
            SlotRole::TableHint => f.write_str("table"),
            SlotRole::Filter(i) => write!(f, "filter #{}", i + 1),
            SlotRole::MeasureName => f.write_str("measure"),
            SlotRole::ExploreTarget => f.write_str("target"),
            SlotRole::MutationTarget => f.write_str("target"),
            SlotRole::MutationParent => f.write_str("owning table"),
            SlotRole::FromTable => f.write_str("from table"),
            SlotRole::FromColumn => f.write_str("from column"),
            SlotRole::ToTable => f.write_str("to table"),
            SlotRole::ToColumn => f.write_str("to column"),
        }
    }
}

/// Kind of catalog object a slot is expected to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expected {
    Table,
    Column,
    Measure,
    Role,
    /// A measure, a column or a table
    Value,
}

/// A slot the resolver has to bind to a catalog object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameSlot {
    pub role: SlotRole,
    pub text: String,
    pub expected: Expected,
    /// Restrict candidates to the table bound for this role
    pub scope: Option<SlotRole>,
    /// Search the whole catalog when nothing in scope matches
    pub scope_fallback: bool,
    pub confidence: f64,
}

impl NameSlot {
    fn new(role: SlotRole, slot: &Slot, expected: Expected) -> Self {
        Self {
            role,
            text: slot.text.clone(),
            expected,
            scope: None,
            scope_fallback: true,
            confidence: slot.confidence,
        }
    }

    fn scoped(mut self, scope: SlotRole, fallback: bool) -> Self {
        self.scope = Some(scope);
        self.scope_fallback = fallback;
        self
    }
}

impl QuerySlots {
    fn name_slots(&self, out: &mut Vec<NameSlot>) {
        if let Some(hint) = &self.table_hint {
            out.push(NameSlot::new(SlotRole::TableHint, hint, Expected::Table));
        }
        if let Some(subject) = &self.subject {
            let mut slot = NameSlot::new(SlotRole::Subject, subject, Expected::Value);
            if self.table_hint.is_some() {
                slot = slot.scoped(SlotRole::TableHint, !self.explicit);
            }
            out.push(slot);
        }
        for (i, filter) in self.filters.iter().enumerate() {
            let mut slot = NameSlot::new(SlotRole::Filter(i), &filter.column, Expected::Column);
            if self.subject.is_some() {
                slot = slot.scoped(SlotRole::Subject, true);
            }
            out.push(slot);
        }
    }
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Query(_) => IntentKind::Query,
            Intent::CreateMeasure(_) => IntentKind::CreateMeasure,
            Intent::ExploreSchema(_) => IntentKind::ExploreSchema,
            Intent::ModelMutation(_) => IntentKind::ModelMutation,
            Intent::TimeIntelligenceQuery(_) => IntentKind::TimeIntelligenceQuery,
            Intent::ConnectionManagement(_) => IntentKind::ConnectionManagement,
            Intent::Troubleshooting(_) => IntentKind::Troubleshooting,
        }
    }

    pub fn query_slots(&self) -> Option<&QuerySlots> {
        match self {
            Intent::Query(q) | Intent::TimeIntelligenceQuery(q) => Some(q),
            Intent::CreateMeasure(m) => Some(&m.query),
            _ => None,
        }
    }

    /// Name-like slots to resolve, ordered so that every scope is bound
    /// before the slots that depend on it.
    pub fn name_slots(&self) -> Vec<NameSlot> {
        let mut out = Vec::new();
        match self {
            Intent::Query(q) | Intent::TimeIntelligenceQuery(q) => q.name_slots(&mut out),
            Intent::CreateMeasure(m) => {
                if m.redefine {
                    if let Some(name) = &m.measure_name {
                        out.push(NameSlot::new(SlotRole::MeasureName, name, Expected::Measure));
                    }
                }
                m.query.name_slots(&mut out);
            }
            Intent::ExploreSchema(e) => {
                if let Some(target) = &e.target {
                    out.push(NameSlot::new(SlotRole::ExploreTarget, target, Expected::Table));
                }
            }
            Intent::ModelMutation(m) => mutation_name_slots(m, &mut out),
            Intent::ConnectionManagement(_) | Intent::Troubleshooting(_) => {}
        }
        out
    }
}

fn mutation_name_slots(m: &MutationSlots, out: &mut Vec<NameSlot>) {
    if let Some(parent) = &m.parent {
        out.push(NameSlot::new(SlotRole::MutationParent, parent, Expected::Table));
    }
    let adding = m.action == MutationAction::Add;
    match m.object {
        ModelObject::Table | ModelObject::Role if adding => {}
        ModelObject::Table => {
            if let Some(target) = &m.target {
                out.push(NameSlot::new(SlotRole::MutationTarget, target, Expected::Table));
            }
        }
        ModelObject::Role => {
            if let Some(target) = &m.target {
                out.push(NameSlot::new(SlotRole::MutationTarget, target, Expected::Role));
            }
        }
        ModelObject::Column | ModelObject::Measure if adding => {}
        ModelObject::Column | ModelObject::Measure => {
            if let Some(target) = &m.target {
                let expected = if m.object == ModelObject::Column {
                    Expected::Column
                } else {
                    Expected::Measure
                };
                let mut slot = NameSlot::new(SlotRole::MutationTarget, target, expected);
                if m.parent.is_some() {
                    slot = slot.scoped(SlotRole::MutationParent, false);
                }
                out.push(slot);
            }
        }
        ModelObject::Relationship => {
            for (endpoint, table_role, column_role) in [
                (&m.from, SlotRole::FromTable, SlotRole::FromColumn),
                (&m.to, SlotRole::ToTable, SlotRole::ToColumn),
            ] {
                if let Some(end) = endpoint {
                    out.push(NameSlot::new(table_role, &end.table, Expected::Table));
                    if let Some(column) = &end.column {
                        out.push(
                            NameSlot::new(column_role, column, Expected::Column)
                                .scoped(table_role, false),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_follows_declaration_order() {
        assert!(IntentKind::ConnectionManagement.priority() < IntentKind::ModelMutation.priority());
        assert!(IntentKind::Query.priority() < IntentKind::ExploreSchema.priority());
        assert_eq!(IntentKind::Troubleshooting.priority(), 6);
    }

    #[test]
    fn test_scope_slots_come_first() {
        let intent = Intent::Query(QuerySlots {
            subject: Some(Slot::new("Amount", 1.0)),
            table_hint: Some(Slot::new("Sales", 1.0)),
            explicit: true,
            filters: vec![FilterSlot {
                column: Slot::new("Region", 0.9),
                op: ComparisonOp::Eq,
                value: "East".into(),
            }],
            ..Default::default()
        });
        let slots = intent.name_slots();
        let roles: Vec<SlotRole> = slots.iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![SlotRole::TableHint, SlotRole::Subject, SlotRole::Filter(0)]);
        assert_eq!(slots[1].scope, Some(SlotRole::TableHint));
        assert!(!slots[1].scope_fallback);
    }

    #[test]
    fn test_added_objects_are_not_resolved() {
        let mut slots = MutationSlots::new(MutationAction::Add, ModelObject::Column);
        slots.target = Some(Slot::new("Discount", 0.9));
        slots.parent = Some(Slot::new("Sales", 0.9));
        let names = Intent::ModelMutation(slots).name_slots();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].role, SlotRole::MutationParent);
    }
}
