//! Model Mutation Planner
//!
//! Turns a mutation request into an ordered list of atomic catalog edits,
//! each recorded with the inverse edit that undoes it. Planning runs against a
//! scratch copy of the catalog so every step is checked in the state it will
//! actually be applied to; the real catalog is untouched until commit.

use crate::catalog::{
    same_name, Cardinality, CatalogEdit, ColumnDef, ColumnRef, CrossFilterDirection, DataKind,
    MeasureDef, MeasureRef, ModelPermission, RelationshipDef, RoleDef, SchemaCatalog, TableDef,
};
use crate::error::PlanError;
use crate::intent::{ModelObject, MutationAction, MutationSlots, Slot, SlotRole};
use crate::resolver::{bound, EntityRef, ResolvedEntity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One atomic edit plus the edit that reverts it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub edit: CatalogEdit,
    pub inverse: CatalogEdit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationPlan {
    pub id: Uuid,
    pub summary: String,
    /// Catalog version the plan was checked against
    pub base_version: u64,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<PlanStep>,
}

impl MutationPlan {
    pub fn inverses(&self) -> Vec<CatalogEdit> {
        self.steps.iter().map(|s| s.inverse.clone()).collect()
    }
}

/// Both ends of a relationship as the request named them. Columns may be left
/// out and are then inferred from the two tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipEnds {
    pub from_table: String,
    pub from_column: Option<String>,
    pub to_table: String,
    pub to_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum MutationRequest {
    AddTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    RenameTable {
        table: String,
        new_name: String,
    },
    RemoveTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    RenameColumn {
        table: String,
        column: String,
        new_name: String,
    },
    RemoveColumn {
        table: String,
        column: String,
    },
    AddRelationship {
        ends: RelationshipEnds,
        cardinality: Cardinality,
        cross_filter: CrossFilterDirection,
        active: bool,
    },
    RemoveRelationship {
        ends: RelationshipEnds,
    },
    SetRelationshipActive {
        ends: RelationshipEnds,
        active: bool,
    },
    AddRole {
        name: String,
        permission: ModelPermission,
    },
    RenameRole {
        role: String,
        new_name: String,
    },
    RemoveRole {
        role: String,
    },
    CreateMeasure {
        measure: MeasureDef,
    },
    RedefineMeasure {
        measure: MeasureDef,
    },
    RenameMeasure {
        measure: MeasureRef,
        new_name: String,
    },
    RemoveMeasure {
        measure: MeasureRef,
    },
}

impl MutationRequest {
    pub fn describe(&self) -> String {
        match self {
            MutationRequest::AddTable { name, columns } => {
                format!("add table '{}' with {} column(s)", name, columns.len())
            }
            MutationRequest::RenameTable { table, new_name } => {
                format!("rename table '{}' to '{}'", table, new_name)
            }
            MutationRequest::RemoveTable { table } => format!("remove table '{}'", table),
            MutationRequest::AddColumn { table, column } => {
                format!("add column '{}'[{}]", table, column.name)
            }
            MutationRequest::RenameColumn {
                table,
                column,
                new_name,
            } => format!("rename column '{}'[{}] to [{}]", table, column, new_name),
            MutationRequest::RemoveColumn { table, column } => {
                format!("remove column '{}'[{}]", table, column)
            }
            MutationRequest::AddRelationship { ends, .. } => {
                format!("add relationship '{}' -> '{}'", ends.from_table, ends.to_table)
            }
            MutationRequest::RemoveRelationship { ends } => {
                format!("remove relationship '{}' -> '{}'", ends.from_table, ends.to_table)
            }
            MutationRequest::SetRelationshipActive { ends, active } => format!(
                "{} relationship '{}' -> '{}'",
                if *active { "activate" } else { "deactivate" },
                ends.from_table,
                ends.to_table
            ),
            MutationRequest::AddRole { name, .. } => format!("add role '{}'", name),
            MutationRequest::RenameRole { role, new_name } => {
                format!("rename role '{}' to '{}'", role, new_name)
            }
            MutationRequest::RemoveRole { role } => format!("remove role '{}'", role),
            MutationRequest::CreateMeasure { measure } => {
                format!("create measure {}", measure.measure_ref())
            }
            MutationRequest::RedefineMeasure { measure } => {
                format!("redefine measure {}", measure.measure_ref())
            }
            MutationRequest::RenameMeasure { measure, new_name } => {
                format!("rename measure {} to [{}]", measure, new_name)
            }
            MutationRequest::RemoveMeasure { measure } => format!("remove measure {}", measure),
        }
    }

    /// Build a request from extracted mutation slots and the entities they
    /// resolved to. Objects being added are taken verbatim from the request.
    pub fn from_slots(slots: &MutationSlots, resolved: &[ResolvedEntity]) -> Result<Self, PlanError> {
        use MutationAction::*;

        let new_name = || text_of(&slots.new_name, "new name");
        let request = match (slots.object, slots.action) {
            (ModelObject::Table, Add) => MutationRequest::AddTable {
                name: text_of(&slots.target, "table name")?,
                columns: slots
                    .columns
                    .iter()
                    .map(|c| ColumnDef::new(c.name.clone(), c.kind))
                    .collect(),
            },
            (ModelObject::Table, Rename) => MutationRequest::RenameTable {
                table: table_of(resolved, SlotRole::MutationTarget, "table")?,
                new_name: new_name()?,
            },
            (ModelObject::Table, Remove) => MutationRequest::RemoveTable {
                table: table_of(resolved, SlotRole::MutationTarget, "table")?,
            },
            (ModelObject::Column, Add) => MutationRequest::AddColumn {
                table: table_of(resolved, SlotRole::MutationParent, "owning table")?,
                column: ColumnDef::new(
                    text_of(&slots.target, "column name")?,
                    slots.data_kind.unwrap_or(DataKind::Text),
                ),
            },
            (ModelObject::Column, Rename) => {
                let column = column_of(resolved, SlotRole::MutationTarget)?;
                MutationRequest::RenameColumn {
                    table: column.table,
                    column: column.column,
                    new_name: new_name()?,
                }
            }
            (ModelObject::Column, Remove) => {
                let column = column_of(resolved, SlotRole::MutationTarget)?;
                MutationRequest::RemoveColumn {
                    table: column.table,
                    column: column.column,
                }
            }
            (ModelObject::Measure, Add) => return Err(PlanError::MissingSlot("measure expression")),
            (ModelObject::Measure, Rename) => MutationRequest::RenameMeasure {
                measure: measure_of(resolved)?,
                new_name: new_name()?,
            },
            (ModelObject::Measure, Remove) => MutationRequest::RemoveMeasure {
                measure: measure_of(resolved)?,
            },
            (ModelObject::Relationship, action) => {
                let ends = RelationshipEnds {
                    from_table: table_of(resolved, SlotRole::FromTable, "from table")?,
                    from_column: bound(resolved, SlotRole::FromColumn).and_then(column_name),
                    to_table: table_of(resolved, SlotRole::ToTable, "to table")?,
                    to_column: bound(resolved, SlotRole::ToColumn).and_then(column_name),
                };
                match action {
                    Add => MutationRequest::AddRelationship {
                        ends,
                        cardinality: slots.cardinality.unwrap_or_default(),
                        cross_filter: slots.cross_filter.unwrap_or_default(),
                        active: slots.active.unwrap_or(true),
                    },
                    Remove => MutationRequest::RemoveRelationship { ends },
                    Activate => MutationRequest::SetRelationshipActive { ends, active: true },
                    Deactivate => MutationRequest::SetRelationshipActive { ends, active: false },
                    Rename => return Err(PlanError::MissingSlot("relationships cannot be renamed")),
                }
            }
            (ModelObject::Role, Add) => MutationRequest::AddRole {
                name: text_of(&slots.target, "role name")?,
                permission: slots.permission.unwrap_or_default(),
            },
            (ModelObject::Role, Rename) => MutationRequest::RenameRole {
                role: role_of(resolved)?,
                new_name: new_name()?,
            },
            (ModelObject::Role, Remove) => MutationRequest::RemoveRole {
                role: role_of(resolved)?,
            },
            (_, Activate) | (_, Deactivate) => {
                return Err(PlanError::MissingSlot("a relationship to (de)activate"))
            }
        };
        Ok(request)
    }
}

fn text_of(slot: &Option<Slot>, what: &'static str) -> Result<String, PlanError> {
    slot.as_ref()
        .map(|s| s.text.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(PlanError::MissingSlot(what))
}

fn table_of(resolved: &[ResolvedEntity], role: SlotRole, what: &'static str) -> Result<String, PlanError> {
    bound(resolved, role)
        .and_then(|r| r.entity.table())
        .map(str::to_string)
        .ok_or(PlanError::MissingSlot(what))
}

fn column_of(resolved: &[ResolvedEntity], role: SlotRole) -> Result<ColumnRef, PlanError> {
    match bound(resolved, role).map(|r| &r.entity) {
        Some(EntityRef::Column(c)) => Ok(c.clone()),
        _ => Err(PlanError::MissingSlot("column")),
    }
}

fn column_name(r: &ResolvedEntity) -> Option<String> {
    match &r.entity {
        EntityRef::Column(c) => Some(c.column.clone()),
        _ => None,
    }
}

fn measure_of(resolved: &[ResolvedEntity]) -> Result<MeasureRef, PlanError> {
    match bound(resolved, SlotRole::MutationTarget).map(|r| &r.entity) {
        Some(EntityRef::Measure(m)) => Ok(m.clone()),
        _ => Err(PlanError::MissingSlot("measure")),
    }
}

fn role_of(resolved: &[ResolvedEntity]) -> Result<String, PlanError> {
    match bound(resolved, SlotRole::MutationTarget).map(|r| &r.entity) {
        Some(EntityRef::Role(r)) => Ok(r.clone()),
        _ => Err(PlanError::MissingSlot("role")),
    }
}

/// Scratch catalog plus the steps recorded so far.
struct Steps {
    scratch: SchemaCatalog,
    steps: Vec<PlanStep>,
}

impl Steps {
    fn push(&mut self, edit: CatalogEdit) -> Result<(), PlanError> {
        let inverse = edit.inverse(&self.scratch)?;
        self.scratch.apply(&edit)?;
        debug!("Planned step {}: {}", self.steps.len(), edit.describe());
        self.steps.push(PlanStep {
            index: self.steps.len(),
            description: edit.describe(),
            edit,
            inverse,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MutationPlanner;

impl MutationPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, request: &MutationRequest, catalog: &SchemaCatalog) -> Result<MutationPlan, PlanError> {
        let mut steps = Steps {
            scratch: catalog.clone(),
            steps: Vec::new(),
        };
        if let Err(e) = self.decompose(request, &mut steps) {
            warn!("Cannot plan '{}': {}", request.describe(), e);
            return Err(e);
        }
        let plan = MutationPlan {
            id: Uuid::new_v4(),
            summary: request.describe(),
            base_version: catalog.version(),
            created_at: Utc::now(),
            steps: steps.steps,
        };
        info!("Planned {} ({} step(s)) as {}", plan.summary, plan.steps.len(), plan.id);
        Ok(plan)
    }

    fn decompose(&self, request: &MutationRequest, steps: &mut Steps) -> Result<(), PlanError> {
        match request {
            MutationRequest::AddTable { name, columns } => {
                let catalog = &steps.scratch;
                if catalog.table(name).is_some() {
                    return Err(already_exists("table", name));
                }
                if columns.is_empty() {
                    return Err(PlanError::MissingSlot("table columns"));
                }
                for (i, column) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| same_name(&c.name, &column.name)) {
                        return Err(already_exists("column", &column.name));
                    }
                }
                let index = catalog.tables().len();
                steps.push(CatalogEdit::InsertTable {
                    index,
                    table: TableDef::new(name.clone(), columns.clone()),
                })
            }
            MutationRequest::RenameTable { table, new_name } => {
                let catalog = &steps.scratch;
                let current = catalog
                    .table(table)
                    .ok_or_else(|| PlanError::UnknownTable(table.clone()))?;
                if !same_name(&current.name, new_name) && catalog.table(new_name).is_some() {
                    return Err(already_exists("table", new_name));
                }
                let from = current.name.clone();
                steps.push(CatalogEdit::RenameTable {
                    from,
                    to: new_name.clone(),
                })
            }
            MutationRequest::RemoveTable { table } => self.remove_table(table, steps),
            MutationRequest::AddColumn { table, column } => {
                let t = steps
                    .scratch
                    .table(table)
                    .ok_or_else(|| PlanError::UnknownTable(table.clone()))?;
                if t.column(&column.name).is_some() {
                    return Err(already_exists("column", &format!("{}[{}]", t.name, column.name)));
                }
                let (table, index) = (t.name.clone(), t.columns.len());
                steps.push(CatalogEdit::InsertColumn {
                    table,
                    index,
                    column: column.clone(),
                })
            }
            MutationRequest::RenameColumn {
                table,
                column,
                new_name,
            } => {
                let current = require_column(&steps.scratch, table, column)?;
                let t = steps
                    .scratch
                    .table(table)
                    .ok_or_else(|| PlanError::UnknownTable(table.clone()))?;
                if !same_name(&current.column, new_name) && t.column(new_name).is_some() {
                    return Err(already_exists("column", &format!("{}[{}]", t.name, new_name)));
                }
                steps.push(CatalogEdit::RenameColumn {
                    table: current.table,
                    from: current.column,
                    to: new_name.clone(),
                })
            }
            MutationRequest::RemoveColumn { table, column } => {
                let current = require_column(&steps.scratch, table, column)?;
                let dependents = steps.scratch.column_dependents(&current);
                if !dependents.is_empty() {
                    return Err(PlanError::ColumnInUse {
                        table: current.table,
                        column: current.column,
                        dependents,
                    });
                }
                steps.push(CatalogEdit::DeleteColumn {
                    table: current.table,
                    name: current.column,
                })
            }
            MutationRequest::AddRelationship {
                ends,
                cardinality,
                cross_filter,
                active,
            } => {
                let relationship = self.new_relationship(ends, *cardinality, *cross_filter, *active, &steps.scratch)?;
                let index = steps.scratch.relationships().len();
                steps.push(CatalogEdit::InsertRelationship { index, relationship })
            }
            MutationRequest::RemoveRelationship { ends } => {
                let key = find_relationship(&steps.scratch, ends, None)?.key();
                steps.push(CatalogEdit::DeleteRelationship { key })
            }
            MutationRequest::SetRelationshipActive { ends, active } => {
                let catalog = &steps.scratch;
                let rel = find_relationship(catalog, ends, Some(!*active))?;
                if *active {
                    if let Some(other) = catalog.active_relationship(&rel.from_table, &rel.to_table) {
                        if other.key() != rel.key() {
                            return Err(PlanError::DuplicateActiveRelationship {
                                from: rel.from_table.clone(),
                                to: rel.to_table.clone(),
                            });
                        }
                    }
                }
                let key = rel.key();
                steps.push(CatalogEdit::SetRelationshipActive { key, active: *active })
            }
            MutationRequest::AddRole { name, permission } => {
                if steps.scratch.role(name).is_some() {
                    return Err(already_exists("role", name));
                }
                let index = steps.scratch.roles().len();
                steps.push(CatalogEdit::InsertRole {
                    index,
                    role: RoleDef::new(name.clone(), *permission),
                })
            }
            MutationRequest::RenameRole { role, new_name } => {
                let current = steps
                    .scratch
                    .role(role)
                    .ok_or_else(|| PlanError::UnknownRole(role.clone()))?;
                if !same_name(&current.name, new_name) && steps.scratch.role(new_name).is_some() {
                    return Err(already_exists("role", new_name));
                }
                let name = current.name.clone();
                let mut renamed = current.clone();
                renamed.name = new_name.clone();
                steps.push(CatalogEdit::ReplaceRole { name, role: renamed })
            }
            MutationRequest::RemoveRole { role } => {
                let name = steps
                    .scratch
                    .role(role)
                    .map(|r| r.name.clone())
                    .ok_or_else(|| PlanError::UnknownRole(role.clone()))?;
                steps.push(CatalogEdit::DeleteRole { name })
            }
            MutationRequest::CreateMeasure { measure } => {
                let t = steps
                    .scratch
                    .table(&measure.table)
                    .ok_or_else(|| PlanError::UnknownTable(measure.table.clone()))?;
                if t.has_measure(&measure.name) {
                    return Err(already_exists("measure", &measure.measure_ref().to_string()));
                }
                let index = steps.scratch.measures().len();
                steps.push(CatalogEdit::InsertMeasure {
                    index,
                    measure: measure.clone(),
                })
            }
            MutationRequest::RedefineMeasure { measure } => {
                let target = measure.measure_ref();
                if steps.scratch.measure(&target).is_none() {
                    return Err(PlanError::UnknownMeasure(target.to_string()));
                }
                steps.push(CatalogEdit::RedefineMeasure {
                    measure: target,
                    expression: measure.expression.clone(),
                    format_string: measure.format_string.clone(),
                })
            }
            MutationRequest::RenameMeasure { measure, new_name } => {
                let current = steps
                    .scratch
                    .measure(measure)
                    .map(|m| m.measure_ref())
                    .ok_or_else(|| PlanError::UnknownMeasure(measure.to_string()))?;
                let taken = steps
                    .scratch
                    .measures_of(&current.table)
                    .any(|m| same_name(&m.name, new_name) && !same_name(&m.name, &current.name));
                if taken {
                    return Err(already_exists("measure", new_name));
                }
                steps.push(CatalogEdit::RenameMeasure {
                    measure: current,
                    to: new_name.clone(),
                })
            }
            MutationRequest::RemoveMeasure { measure } => {
                let current = steps
                    .scratch
                    .measure(measure)
                    .map(|m| m.measure_ref())
                    .ok_or_else(|| PlanError::UnknownMeasure(measure.to_string()))?;
                steps.push(CatalogEdit::DeleteMeasure { measure: current })
            }
        }
    }

    /// Relationships, owned measures (dependents first) and role filters go
    /// before the table itself.
    fn remove_table(&self, table: &str, steps: &mut Steps) -> Result<(), PlanError> {
        let name = steps
            .scratch
            .table(table)
            .map(|t| t.name.clone())
            .ok_or_else(|| PlanError::UnknownTable(table.to_string()))?;

        // Measures elsewhere that read this table's columns keep it alive.
        for m in steps.scratch.measures().iter().filter(|m| !same_name(&m.table, &name)) {
            if let Some(column) = m
                .expression
                .column_refs()
                .into_iter()
                .find(|c| same_name(&c.table, &name))
            {
                return Err(PlanError::ColumnInUse {
                    table: column.table,
                    column: column.column,
                    dependents: vec![format!("measure {}", m.measure_ref())],
                });
            }
        }

        let keys: Vec<_> = steps
            .scratch
            .relationships()
            .iter()
            .filter(|r| r.touches(&name))
            .map(|r| r.key())
            .collect();
        for key in keys {
            steps.push(CatalogEdit::DeleteRelationship { key })?;
        }

        loop {
            let next = {
                let owned: Vec<MeasureRef> = steps.scratch.measures_of(&name).map(|m| m.measure_ref()).collect();
                if owned.is_empty() {
                    break;
                }
                // A measure nothing else depends on; anything else means an
                // outside measure references one of ours.
                match owned
                    .iter()
                    .find(|m| steps.scratch.measure_dependents(m).is_empty())
                {
                    Some(free) => free.clone(),
                    None => {
                        let blocked = &owned[0];
                        let by = steps.scratch.measure_dependents(blocked);
                        return Err(crate::error::CatalogError::InUse {
                            name: blocked.to_string(),
                            by: by.iter().map(|m| format!("measure {}", m)).collect::<Vec<_>>().join(", "),
                        }
                        .into());
                    }
                }
            };
            steps.push(CatalogEdit::DeleteMeasure { measure: next })?;
        }

        let filtered: Vec<RoleDef> = steps
            .scratch
            .roles()
            .iter()
            .filter(|r| r.table_filters.iter().any(|f| same_name(&f.table, &name)))
            .cloned()
            .collect();
        for role in filtered {
            let mut stripped = role.clone();
            stripped.table_filters.retain(|f| !same_name(&f.table, &name));
            steps.push(CatalogEdit::ReplaceRole {
                name: role.name,
                role: stripped,
            })?;
        }

        steps.push(CatalogEdit::DeleteTable { name })
    }

    fn new_relationship(
        &self,
        ends: &RelationshipEnds,
        cardinality: Cardinality,
        cross_filter: CrossFilterDirection,
        active: bool,
        catalog: &SchemaCatalog,
    ) -> Result<RelationshipDef, PlanError> {
        let from = catalog
            .table(&ends.from_table)
            .ok_or_else(|| PlanError::UnknownTable(ends.from_table.clone()))?;
        let to = catalog
            .table(&ends.to_table)
            .ok_or_else(|| PlanError::UnknownTable(ends.to_table.clone()))?;

        let (from_column, to_column) = match (&ends.from_column, &ends.to_column) {
            (Some(f), Some(t)) => (f.clone(), t.clone()),
            (Some(f), None) => (f.clone(), f.clone()),
            (None, Some(t)) => (t.clone(), t.clone()),
            // Key columns usually share a name; take the first one the lookup
            // side has in common with the fact side.
            (None, None) => to
                .columns
                .iter()
                .find(|c| from.column(&c.name).is_some())
                .map(|c| (c.name.clone(), c.name.clone()))
                .ok_or(PlanError::MissingSlot("relationship columns"))?,
        };
        let from_ref = require_column(catalog, &from.name, &from_column)?;
        let to_ref = require_column(catalog, &to.name, &to_column)?;

        let kind = |c: &ColumnRef| catalog.column(c).map(|d| d.kind);
        if kind(&from_ref) != kind(&to_ref) {
            return Err(PlanError::IncompatibleEndpoints {
                from: from_ref,
                to: to_ref,
            });
        }

        let relationship = RelationshipDef {
            from_table: from_ref.table,
            from_column: from_ref.column,
            to_table: to_ref.table,
            to_column: to_ref.column,
            cardinality,
            cross_filter,
            active,
        };
        if catalog.relationship(&relationship.key()).is_some() {
            return Err(already_exists("relationship", &relationship.to_string()));
        }
        if active
            && catalog
                .active_relationship(&relationship.from_table, &relationship.to_table)
                .is_some()
        {
            return Err(PlanError::DuplicateActiveRelationship {
                from: relationship.from_table,
                to: relationship.to_table,
            });
        }
        Ok(relationship)
    }
}

fn already_exists(kind: &'static str, name: &str) -> PlanError {
    PlanError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

/// Canonically-cased reference to an existing column.
fn require_column(catalog: &SchemaCatalog, table: &str, column: &str) -> Result<ColumnRef, PlanError> {
    let t = catalog
        .table(table)
        .ok_or_else(|| PlanError::UnknownTable(table.to_string()))?;
    let c = t.column(column).ok_or_else(|| PlanError::UnknownColumn {
        table: t.name.clone(),
        column: column.to_string(),
    })?;
    Ok(ColumnRef::new(&t.name, &c.name))
}

/// The single relationship matching `ends` (either orientation). When
/// `active` is given, relationships already in the requested state are
/// skipped if that leaves exactly one candidate.
fn find_relationship<'a>(
    catalog: &'a SchemaCatalog,
    ends: &RelationshipEnds,
    active: Option<bool>,
) -> Result<&'a RelationshipDef, PlanError> {
    let column_matches = |rel: &RelationshipDef| {
        let named = [&ends.from_column, &ends.to_column];
        named
            .iter()
            .filter_map(|c| c.as_deref())
            .all(|c| same_name(&rel.from_column, c) || same_name(&rel.to_column, c))
    };
    let candidates: Vec<&RelationshipDef> = catalog
        .relationships()
        .iter()
        .filter(|r| r.connects(&ends.from_table, &ends.to_table) && column_matches(r))
        .collect();

    let narrowed: Vec<&RelationshipDef> = match active {
        Some(state) if candidates.len() > 1 => candidates.iter().copied().filter(|r| r.active == state).collect(),
        _ => candidates.clone(),
    };
    match narrowed.as_slice() {
        [only] => Ok(*only),
        [] if candidates.is_empty() => Err(PlanError::UnknownRelationship(
            ends.from_table.clone(),
            ends.to_table.clone(),
        )),
        _ => Err(PlanError::MissingSlot("relationship columns")),
    }
}

impl SchemaCatalog {
    /// Apply every step of `plan`, or none of them. Bumps the version once on
    /// success.
    pub fn apply_plan(&mut self, plan: &MutationPlan) -> Result<(), PlanError> {
        if plan.base_version != self.version() {
            return Err(PlanError::StaleCatalog {
                planned: plan.base_version,
                current: self.version(),
            });
        }
        let mut applied: Vec<CatalogEdit> = Vec::new();
        for step in &plan.steps {
            if let Err(e) = self.apply(&step.edit) {
                warn!("Step {} of plan {} refused: {}", step.index, plan.id, e);
                let failures = self.roll_back(&applied);
                if !failures.is_empty() {
                    error!(
                        "Plan {} left {} edit(s) unreverted after step {}",
                        plan.id,
                        failures.len(),
                        step.index
                    );
                    return Err(PlanError::RollbackIncomplete {
                        step: step.index,
                        cause: e,
                        failures,
                    });
                }
                return Err(e.into());
            }
            applied.push(step.inverse.clone());
        }
        self.bump_version();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::sample_catalog;
    use crate::intent::ColumnSpecSlot;

    fn ends(from: &str, to: &str) -> RelationshipEnds {
        RelationshipEnds {
            from_table: from.into(),
            from_column: None,
            to_table: to.into(),
            to_column: None,
        }
    }

    fn resolved(role: SlotRole, entity: EntityRef) -> ResolvedEntity {
        ResolvedEntity {
            role,
            text: entity.to_string(),
            entity,
            confidence: 1.0,
            alternatives: Vec::new(),
        }
    }

    #[test]
    fn test_rename_table_plan() {
        let mut catalog = sample_catalog();
        let plan = MutationPlanner::new()
            .plan(
                &MutationRequest::RenameTable {
                    table: "sales".into(),
                    new_name: "Orders".into(),
                },
                &catalog,
            )
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.base_version, 1);
        assert_eq!(
            plan.steps[0].inverse,
            CatalogEdit::RenameTable {
                from: "Orders".into(),
                to: "Sales".into()
            }
        );

        catalog.apply_plan(&plan).unwrap();
        assert_eq!(catalog.version(), 2);
        assert_eq!(catalog.relationships()[0].from_table, "Orders");
        assert!(catalog.measure(&MeasureRef::new("Orders", "Order Count")).is_some());
    }

    #[test]
    fn test_remove_table_decomposes_and_reverts() {
        let original = sample_catalog();
        let plan = MutationPlanner::new()
            .plan(&MutationRequest::RemoveTable { table: "Sales".into() }, &original)
            .unwrap();
        let descriptions: Vec<&str> = plan.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions.len(), 5);
        assert!(descriptions[0].starts_with("remove relationship"));
        assert!(descriptions[1].starts_with("remove relationship"));
        assert_eq!(descriptions[2], "remove measure 'Sales'[Order Count]");
        assert_eq!(descriptions[3], "update role 'Regional Managers'");
        assert_eq!(descriptions[4], "remove table 'Sales'");

        let mut catalog = original.clone();
        for step in &plan.steps {
            catalog.apply(&step.edit).unwrap();
        }
        assert!(catalog.table("Sales").is_none());
        assert!(catalog.role("Regional Managers").unwrap().table_filters.is_empty());

        let failures = catalog.roll_back(&plan.inverses());
        assert!(failures.is_empty());
        assert_eq!(catalog.to_snapshot(), original.to_snapshot());
    }

    #[test]
    fn test_column_in_use_is_refused() {
        let catalog = sample_catalog();
        let err = MutationPlanner::new()
            .plan(
                &MutationRequest::RemoveColumn {
                    table: "Sales".into(),
                    column: "OrderDate".into(),
                },
                &catalog,
            )
            .unwrap_err();
        match err {
            PlanError::ColumnInUse { dependents, .. } => {
                assert_eq!(dependents.len(), 1);
                assert!(dependents[0].starts_with("relationship"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_active_relationship_is_refused() {
        let catalog = sample_catalog();
        let err = MutationPlanner::new()
            .plan(
                &MutationRequest::AddRelationship {
                    ends: RelationshipEnds {
                        from_table: "Sales".into(),
                        from_column: Some("Region".into()),
                        to_table: "Products".into(),
                        to_column: Some("Category".into()),
                    },
                    cardinality: Cardinality::ManyToOne,
                    cross_filter: CrossFilterDirection::Single,
                    active: true,
                },
                &catalog,
            )
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::DuplicateActiveRelationship {
                from: "Sales".into(),
                to: "Products".into()
            }
        );
    }

    #[test]
    fn test_relationship_columns_are_inferred() {
        let mut catalog = sample_catalog();
        let key = catalog.relationships()[1].key();
        catalog.apply(&CatalogEdit::DeleteRelationship { key: key.clone() }).unwrap();

        let plan = MutationPlanner::new()
            .plan(
                &MutationRequest::AddRelationship {
                    ends: ends("sales", "products"),
                    cardinality: Cardinality::ManyToOne,
                    cross_filter: CrossFilterDirection::Both,
                    active: true,
                },
                &catalog,
            )
            .unwrap();
        match &plan.steps[0].edit {
            CatalogEdit::InsertRelationship { relationship, .. } => {
                assert_eq!(relationship.key(), key);
                assert_eq!(relationship.cross_filter, CrossFilterDirection::Both);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_incompatible_endpoints() {
        let catalog = sample_catalog();
        let err = MutationPlanner::new()
            .plan(
                &MutationRequest::AddRelationship {
                    ends: RelationshipEnds {
                        from_table: "Finance".into(),
                        from_column: Some("Revenue".into()),
                        to_table: "Date".into(),
                        to_column: Some("Date".into()),
                    },
                    cardinality: Cardinality::ManyToOne,
                    cross_filter: CrossFilterDirection::Single,
                    active: true,
                },
                &catalog,
            )
            .unwrap_err();
        assert!(matches!(err, PlanError::IncompatibleEndpoints { .. }));
    }

    #[test]
    fn test_deactivate_relationship() {
        let catalog = sample_catalog();
        let plan = MutationPlanner::new()
            .plan(
                &MutationRequest::SetRelationshipActive {
                    ends: ends("Date", "Sales"),
                    active: false,
                },
                &catalog,
            )
            .unwrap();
        assert_eq!(
            plan.steps[0].inverse,
            CatalogEdit::SetRelationshipActive {
                key: catalog.relationships()[0].key(),
                active: true
            }
        );
    }

    #[test]
    fn test_stale_plan_is_not_applied() {
        let mut catalog = sample_catalog();
        let plan = MutationPlanner::new()
            .plan(&MutationRequest::RemoveRole { role: "regional managers".into() }, &catalog)
            .unwrap();
        catalog.bump_version();
        let err = catalog.apply_plan(&plan).unwrap_err();
        assert_eq!(err, PlanError::StaleCatalog { planned: 1, current: 2 });
        assert!(catalog.role("Regional Managers").is_some());
    }

    fn step(index: usize, edit: CatalogEdit, inverse: CatalogEdit) -> PlanStep {
        PlanStep {
            index,
            description: edit.describe(),
            edit,
            inverse,
        }
    }

    fn hand_built_plan(catalog: &SchemaCatalog, steps: Vec<PlanStep>) -> MutationPlan {
        MutationPlan {
            id: Uuid::new_v4(),
            summary: "hand-built".into(),
            base_version: catalog.version(),
            created_at: Utc::now(),
            steps,
        }
    }

    #[test]
    fn test_failed_step_rolls_back_earlier_steps() {
        let mut catalog = sample_catalog();
        let before = catalog.clone();
        let plan = hand_built_plan(
            &catalog,
            vec![
                step(
                    0,
                    CatalogEdit::RenameTable { from: "Finance".into(), to: "Ledger".into() },
                    CatalogEdit::RenameTable { from: "Ledger".into(), to: "Finance".into() },
                ),
                step(
                    1,
                    CatalogEdit::DeleteTable { name: "Nowhere".into() },
                    CatalogEdit::DeleteTable { name: "Nowhere".into() },
                ),
            ],
        );
        let err = catalog.apply_plan(&plan).unwrap_err();
        assert!(matches!(err, PlanError::Catalog(_)));
        assert_eq!(catalog, before);
    }

    #[test]
    fn test_unreverted_rollback_is_reported() {
        let mut catalog = sample_catalog();
        let plan = hand_built_plan(
            &catalog,
            vec![
                step(
                    0,
                    CatalogEdit::RenameTable { from: "Finance".into(), to: "Ledger".into() },
                    CatalogEdit::RenameTable { from: "Missing".into(), to: "Finance".into() },
                ),
                step(
                    1,
                    CatalogEdit::DeleteTable { name: "Nowhere".into() },
                    CatalogEdit::DeleteTable { name: "Nowhere".into() },
                ),
            ],
        );
        match catalog.apply_plan(&plan).unwrap_err() {
            PlanError::RollbackIncomplete { step, failures, .. } => {
                assert_eq!(step, 1);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("Missing"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(catalog.version(), 1);
    }

    #[test]
    fn test_duplicate_names_are_refused() {
        let catalog = sample_catalog();
        let planner = MutationPlanner::new();
        let err = planner
            .plan(
                &MutationRequest::AddTable {
                    name: "sales".into(),
                    columns: vec![ColumnDef::new("Id", DataKind::Text)],
                },
                &catalog,
            )
            .unwrap_err();
        assert_eq!(err, already_exists("table", "sales"));

        let same_name_rename = planner
            .plan(
                &MutationRequest::RenameMeasure {
                    measure: MeasureRef::new("Sales", "Order Count"),
                    new_name: "Order Count".into(),
                },
                &catalog,
            )
            .map(|p| p.steps.len());
        assert_eq!(same_name_rename, Ok(1));
    }

    #[test]
    fn test_request_from_slots() {
        let mut slots = MutationSlots::new(MutationAction::Add, ModelObject::Table);
        slots.target = Some(Slot::new("Budget", 0.9));
        slots.columns = vec![
            ColumnSpecSlot {
                name: "Period".into(),
                kind: DataKind::Text,
            },
            ColumnSpecSlot {
                name: "Amount".into(),
                kind: DataKind::Numeric,
            },
        ];
        let request = MutationRequest::from_slots(&slots, &[]).unwrap();
        assert_eq!(
            request,
            MutationRequest::AddTable {
                name: "Budget".into(),
                columns: vec![
                    ColumnDef::new("Period", DataKind::Text),
                    ColumnDef::new("Amount", DataKind::Numeric)
                ],
            }
        );

        let mut slots = MutationSlots::new(MutationAction::Rename, ModelObject::Column);
        slots.target = Some(Slot::new("amt", 0.9));
        slots.new_name = Some(Slot::new("Net Amount", 0.9));
        let request = MutationRequest::from_slots(
            &slots,
            &[resolved(
                SlotRole::MutationTarget,
                EntityRef::Column(ColumnRef::new("Sales", "Amount")),
            )],
        )
        .unwrap();
        assert_eq!(
            request,
            MutationRequest::RenameColumn {
                table: "Sales".into(),
                column: "Amount".into(),
                new_name: "Net Amount".into(),
            }
        );

        let slots = MutationSlots::new(MutationAction::Remove, ModelObject::Role);
        assert_eq!(
            MutationRequest::from_slots(&slots, &[]),
            Err(PlanError::MissingSlot("role"))
        );
    }
}
