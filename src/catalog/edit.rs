//! Atomic catalog edits
//!
//! Every model mutation is decomposed into these edits. Each edit can produce
//! its exact inverse against the catalog state it is about to be applied to,
//! which is what makes rollback possible without snapshotting the catalog.
//! Positional edits carry the index they restore to, so an undo puts tables,
//! columns and measures back where they were.

use super::{
    same_name, ColumnDef, ColumnRef, MeasureDef, MeasureRef, RelationshipDef, RelationshipKey,
    RoleDef, SchemaCatalog, TableDef,
};
use crate::error::CatalogError;
use crate::expr::Expr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum CatalogEdit {
    InsertTable { index: usize, table: TableDef },
    DeleteTable { name: String },
    RenameTable { from: String, to: String },
    InsertColumn { table: String, index: usize, column: ColumnDef },
    DeleteColumn { table: String, name: String },
    RenameColumn { table: String, from: String, to: String },
    InsertRelationship { index: usize, relationship: RelationshipDef },
    DeleteRelationship { key: RelationshipKey },
    SetRelationshipActive { key: RelationshipKey, active: bool },
    InsertMeasure { index: usize, measure: MeasureDef },
    DeleteMeasure { measure: MeasureRef },
    RedefineMeasure { measure: MeasureRef, expression: Expr, format_string: String },
    RenameMeasure { measure: MeasureRef, to: String },
    InsertRole { index: usize, role: RoleDef },
    DeleteRole { name: String },
    ReplaceRole { name: String, role: RoleDef },
}

impl CatalogEdit {
    pub fn describe(&self) -> String {
        match self {
            CatalogEdit::InsertTable { table, .. } => format!("add table '{}'", table.name),
            CatalogEdit::DeleteTable { name } => format!("remove table '{}'", name),
            CatalogEdit::RenameTable { from, to } => format!("rename table '{}' to '{}'", from, to),
            CatalogEdit::InsertColumn { table, column, .. } => {
                format!("add {} column '{}'[{}]", column.kind, table, column.name)
            }
            CatalogEdit::DeleteColumn { table, name } => {
                format!("remove column '{}'[{}]", table, name)
            }
            CatalogEdit::RenameColumn { table, from, to } => {
                format!("rename column '{}'[{}] to [{}]", table, from, to)
            }
            CatalogEdit::InsertRelationship { relationship, .. } => {
                format!("add relationship {}", relationship)
            }
            CatalogEdit::DeleteRelationship { key } => format!("remove relationship {}", key),
            CatalogEdit::SetRelationshipActive { key, active } => format!(
                "{} relationship {}",
                if *active { "activate" } else { "deactivate" },
                key
            ),
            CatalogEdit::InsertMeasure { measure, .. } => {
                format!("add measure {}", measure.measure_ref())
            }
            CatalogEdit::DeleteMeasure { measure } => format!("remove measure {}", measure),
            CatalogEdit::RedefineMeasure { measure, .. } => format!("redefine measure {}", measure),
            CatalogEdit::RenameMeasure { measure, to } => {
                format!("rename measure {} to [{}]", measure, to)
            }
            CatalogEdit::InsertRole { role, .. } => format!("add role '{}'", role.name),
            CatalogEdit::DeleteRole { name } => format!("remove role '{}'", name),
            CatalogEdit::ReplaceRole { name, .. } => format!("update role '{}'", name),
        }
    }

    /// The edit that undoes `self`, computed against the state `self` will be
    /// applied to.
    pub fn inverse(&self, catalog: &SchemaCatalog) -> Result<CatalogEdit, CatalogError> {
        let inverse = match self {
            CatalogEdit::InsertTable { table, .. } => CatalogEdit::DeleteTable {
                name: table.name.clone(),
            },
            CatalogEdit::DeleteTable { name } => {
                let index = catalog
                    .table_index(name)
                    .ok_or_else(|| CatalogError::UnknownTable(name.clone()))?;
                CatalogEdit::InsertTable {
                    index,
                    table: catalog.tables[index].clone(),
                }
            }
            CatalogEdit::RenameTable { from, to } => {
                let current = catalog
                    .table(from)
                    .ok_or_else(|| CatalogError::UnknownTable(from.clone()))?;
                CatalogEdit::RenameTable {
                    from: to.clone(),
                    to: current.name.clone(),
                }
            }
            CatalogEdit::InsertColumn { table, column, .. } => CatalogEdit::DeleteColumn {
                table: table.clone(),
                name: column.name.clone(),
            },
            CatalogEdit::DeleteColumn { table, name } => {
                let t = catalog
                    .table(table)
                    .ok_or_else(|| CatalogError::UnknownTable(table.clone()))?;
                let index = t
                    .column_index(name)
                    .ok_or_else(|| CatalogError::UnknownColumn(ColumnRef::new(table, name)))?;
                CatalogEdit::InsertColumn {
                    table: t.name.clone(),
                    index,
                    column: t.columns[index].clone(),
                }
            }
            CatalogEdit::RenameColumn { table, from, to } => {
                let column = catalog
                    .column(&ColumnRef::new(table, from))
                    .ok_or_else(|| CatalogError::UnknownColumn(ColumnRef::new(table, from)))?;
                CatalogEdit::RenameColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: column.name.clone(),
                }
            }
            CatalogEdit::InsertRelationship { relationship, .. } => {
                CatalogEdit::DeleteRelationship {
                    key: relationship.key(),
                }
            }
            CatalogEdit::DeleteRelationship { key } => {
                let index = catalog
                    .relationship_index(key)
                    .ok_or_else(|| CatalogError::UnknownRelationship(key.to_string()))?;
                CatalogEdit::InsertRelationship {
                    index,
                    relationship: catalog.relationships[index].clone(),
                }
            }
            CatalogEdit::SetRelationshipActive { key, .. } => {
                let rel = catalog
                    .relationship(key)
                    .ok_or_else(|| CatalogError::UnknownRelationship(key.to_string()))?;
                CatalogEdit::SetRelationshipActive {
                    key: key.clone(),
                    active: rel.active,
                }
            }
            CatalogEdit::InsertMeasure { measure, .. } => CatalogEdit::DeleteMeasure {
                measure: measure.measure_ref(),
            },
            CatalogEdit::DeleteMeasure { measure } => {
                let index = catalog
                    .measure_index(measure)
                    .ok_or_else(|| unknown_measure(measure))?;
                CatalogEdit::InsertMeasure {
                    index,
                    measure: catalog.measures[index].clone(),
                }
            }
            CatalogEdit::RedefineMeasure { measure, .. } => {
                let current = catalog.measure(measure).ok_or_else(|| unknown_measure(measure))?;
                CatalogEdit::RedefineMeasure {
                    measure: measure.clone(),
                    expression: current.expression.clone(),
                    format_string: current.format_string.clone(),
                }
            }
            CatalogEdit::RenameMeasure { measure, to } => {
                let current = catalog.measure(measure).ok_or_else(|| unknown_measure(measure))?;
                CatalogEdit::RenameMeasure {
                    measure: MeasureRef::new(&current.table, to),
                    to: current.name.clone(),
                }
            }
            CatalogEdit::InsertRole { role, .. } => CatalogEdit::DeleteRole {
                name: role.name.clone(),
            },
            CatalogEdit::DeleteRole { name } => {
                let index = catalog
                    .role_index(name)
                    .ok_or_else(|| CatalogError::UnknownRole(name.clone()))?;
                CatalogEdit::InsertRole {
                    index,
                    role: catalog.roles[index].clone(),
                }
            }
            CatalogEdit::ReplaceRole { name, role } => {
                let current = catalog
                    .role(name)
                    .ok_or_else(|| CatalogError::UnknownRole(name.clone()))?;
                CatalogEdit::ReplaceRole {
                    name: role.name.clone(),
                    role: current.clone(),
                }
            }
        };
        Ok(inverse)
    }
}

fn unknown_measure(measure: &MeasureRef) -> CatalogError {
    CatalogError::UnknownMeasure {
        table: measure.table.clone(),
        name: measure.name.clone(),
    }
}

fn check_index(kind: &'static str, index: usize, len: usize) -> Result<(), CatalogError> {
    if index > len {
        return Err(CatalogError::IndexOutOfRange { kind, index });
    }
    Ok(())
}

impl SchemaCatalog {
    /// Apply one edit, keeping every catalog invariant. The version is not
    /// bumped here; a committed plan bumps it once.
    pub fn apply(&mut self, edit: &CatalogEdit) -> Result<(), CatalogError> {
        match edit {
            CatalogEdit::InsertTable { index, table } => {
                if self.table(&table.name).is_some() {
                    return Err(CatalogError::Duplicate {
                        kind: "table",
                        name: table.name.clone(),
                    });
                }
                check_index("table", *index, self.tables.len())?;
                let mut table = table.clone();
                // Scoped measures come back through their own inserts.
                table.measures.clear();
                self.tables.insert(*index, table);
            }
            CatalogEdit::DeleteTable { name } => {
                let index = self
                    .table_index(name)
                    .ok_or_else(|| CatalogError::UnknownTable(name.clone()))?;
                let mut users = Vec::new();
                if let Some(rel) = self.relationships.iter().find(|r| r.touches(name)) {
                    users.push(format!("relationship {}", rel));
                }
                if let Some(m) = self.measures.iter().find(|m| {
                    same_name(&m.table, name)
                        || m.expression.column_refs().iter().any(|c| same_name(&c.table, name))
                }) {
                    users.push(format!("measure {}", m.measure_ref()));
                }
                if let Some(role) = self
                    .roles
                    .iter()
                    .find(|r| r.table_filters.iter().any(|f| same_name(&f.table, name)))
                {
                    users.push(format!("role '{}'", role.name));
                }
                if !users.is_empty() {
                    return Err(CatalogError::InUse {
                        name: name.clone(),
                        by: users.join(", "),
                    });
                }
                self.tables.remove(index);
            }
            CatalogEdit::RenameTable { from, to } => {
                let index = self
                    .table_index(from)
                    .ok_or_else(|| CatalogError::UnknownTable(from.clone()))?;
                if let Some(existing) = self.table_index(to) {
                    if existing != index {
                        return Err(CatalogError::Duplicate {
                            kind: "table",
                            name: to.clone(),
                        });
                    }
                }
                let old = std::mem::replace(&mut self.tables[index].name, to.clone());
                for rel in &mut self.relationships {
                    if same_name(&rel.from_table, &old) {
                        rel.from_table = to.clone();
                    }
                    if same_name(&rel.to_table, &old) {
                        rel.to_table = to.clone();
                    }
                }
                for m in &mut self.measures {
                    if same_name(&m.table, &old) {
                        m.table = to.clone();
                    }
                    m.expression.rename_table(&old, to);
                }
                for role in &mut self.roles {
                    for filter in &mut role.table_filters {
                        if same_name(&filter.table, &old) {
                            filter.table = to.clone();
                        }
                    }
                }
            }
            CatalogEdit::InsertColumn { table, index, column } => {
                let t = self
                    .table_mut(table)
                    .ok_or_else(|| CatalogError::UnknownTable(table.clone()))?;
                if t.column(&column.name).is_some() {
                    return Err(CatalogError::Duplicate {
                        kind: "column",
                        name: format!("{}[{}]", table, column.name),
                    });
                }
                check_index("column", *index, t.columns.len())?;
                t.columns.insert(*index, column.clone());
            }
            CatalogEdit::DeleteColumn { table, name } => {
                let column = ColumnRef::new(table, name);
                if self.column(&column).is_none() {
                    return Err(CatalogError::UnknownColumn(column));
                }
                let dependents = self.column_dependents(&column);
                if !dependents.is_empty() {
                    return Err(CatalogError::InUse {
                        name: column.to_string(),
                        by: dependents.join(", "),
                    });
                }
                if let Some(t) = self.table_mut(table) {
                    t.columns.retain(|c| !same_name(&c.name, name));
                }
            }
            CatalogEdit::RenameColumn { table, from, to } => {
                let t = self
                    .table_mut(table)
                    .ok_or_else(|| CatalogError::UnknownTable(table.clone()))?;
                let index = t
                    .column_index(from)
                    .ok_or_else(|| CatalogError::UnknownColumn(ColumnRef::new(table, from)))?;
                if let Some(existing) = t.column_index(to) {
                    if existing != index {
                        return Err(CatalogError::Duplicate {
                            kind: "column",
                            name: format!("{}[{}]", table, to),
                        });
                    }
                }
                let table_name = t.name.clone();
                let old = std::mem::replace(&mut t.columns[index].name, to.clone());
                for rel in &mut self.relationships {
                    if same_name(&rel.from_table, &table_name) && same_name(&rel.from_column, &old) {
                        rel.from_column = to.clone();
                    }
                    if same_name(&rel.to_table, &table_name) && same_name(&rel.to_column, &old) {
                        rel.to_column = to.clone();
                    }
                }
                for m in &mut self.measures {
                    m.expression.rename_column(&table_name, &old, to);
                }
            }
            CatalogEdit::InsertRelationship { index, relationship } => {
                for end in [relationship.from_ref(), relationship.to_ref()] {
                    self.require_column(&end)?;
                }
                if self.relationship(&relationship.key()).is_some() {
                    return Err(CatalogError::Duplicate {
                        kind: "relationship",
                        name: relationship.to_string(),
                    });
                }
                if relationship.active
                    && self
                        .active_relationship(&relationship.from_table, &relationship.to_table)
                        .is_some()
                {
                    return Err(CatalogError::DuplicateActiveRelationship {
                        from: relationship.from_table.clone(),
                        to: relationship.to_table.clone(),
                    });
                }
                check_index("relationship", *index, self.relationships.len())?;
                self.relationships.insert(*index, relationship.clone());
            }
            CatalogEdit::DeleteRelationship { key } => {
                let index = self
                    .relationship_index(key)
                    .ok_or_else(|| CatalogError::UnknownRelationship(key.to_string()))?;
                self.relationships.remove(index);
            }
            CatalogEdit::SetRelationshipActive { key, active } => {
                let index = self
                    .relationship_index(key)
                    .ok_or_else(|| CatalogError::UnknownRelationship(key.to_string()))?;
                if *active {
                    let rel = &self.relationships[index];
                    let clash = self.relationships.iter().enumerate().any(|(i, r)| {
                        i != index
                            && r.active
                            && same_name(&r.from_table, &rel.from_table)
                            && same_name(&r.to_table, &rel.to_table)
                    });
                    if clash {
                        return Err(CatalogError::DuplicateActiveRelationship {
                            from: rel.from_table.clone(),
                            to: rel.to_table.clone(),
                        });
                    }
                }
                self.relationships[index].active = *active;
            }
            CatalogEdit::InsertMeasure { index, measure } => {
                let table = self
                    .table(&measure.table)
                    .ok_or_else(|| CatalogError::UnknownTable(measure.table.clone()))?;
                if table.has_measure(&measure.name) {
                    return Err(CatalogError::Duplicate {
                        kind: "measure",
                        name: measure.measure_ref().to_string(),
                    });
                }
                for column in measure.expression.column_refs() {
                    self.require_column(&column)?;
                }
                check_index("measure", *index, self.measures.len())?;
                if let Some(t) = self.table_mut(&measure.table) {
                    t.measures.insert(measure.name.clone());
                }
                self.measures.insert(*index, measure.clone());
            }
            CatalogEdit::DeleteMeasure { measure } => {
                let index = self
                    .measure_index(measure)
                    .ok_or_else(|| unknown_measure(measure))?;
                let dependents = self.measure_dependents(measure);
                if !dependents.is_empty() {
                    return Err(CatalogError::InUse {
                        name: measure.to_string(),
                        by: dependents
                            .iter()
                            .map(|m| format!("measure {}", m))
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
                let removed = self.measures.remove(index);
                if let Some(t) = self.table_mut(&removed.table) {
                    t.measures.retain(|n| !same_name(n, &removed.name));
                }
            }
            CatalogEdit::RedefineMeasure {
                measure,
                expression,
                format_string,
            } => {
                for column in expression.column_refs() {
                    self.require_column(&column)?;
                }
                let index = self
                    .measure_index(measure)
                    .ok_or_else(|| unknown_measure(measure))?;
                let m = &mut self.measures[index];
                m.expression = expression.clone();
                m.format_string = format_string.clone();
            }
            CatalogEdit::RenameMeasure { measure, to } => {
                let index = self
                    .measure_index(measure)
                    .ok_or_else(|| unknown_measure(measure))?;
                let table_name = self.measures[index].table.clone();
                let old = self.measures[index].name.clone();
                let clash = self
                    .measures
                    .iter()
                    .enumerate()
                    .any(|(i, m)| i != index && same_name(&m.table, &table_name) && same_name(&m.name, to));
                if clash {
                    return Err(CatalogError::Duplicate {
                        kind: "measure",
                        name: format!("{}[{}]", table_name, to),
                    });
                }
                self.measures[index].name = to.clone();
                for m in &mut self.measures {
                    m.expression.rename_measure(&table_name, &old, to);
                }
                if let Some(t) = self.table_mut(&table_name) {
                    t.measures.retain(|n| !same_name(n, &old));
                    t.measures.insert(to.clone());
                }
            }
            CatalogEdit::InsertRole { index, role } => {
                if self.role(&role.name).is_some() {
                    return Err(CatalogError::Duplicate {
                        kind: "role",
                        name: role.name.clone(),
                    });
                }
                self.check_role_filters(role)?;
                check_index("role", *index, self.roles.len())?;
                self.roles.insert(*index, role.clone());
            }
            CatalogEdit::DeleteRole { name } => {
                let index = self
                    .role_index(name)
                    .ok_or_else(|| CatalogError::UnknownRole(name.clone()))?;
                self.roles.remove(index);
            }
            CatalogEdit::ReplaceRole { name, role } => {
                let index = self
                    .role_index(name)
                    .ok_or_else(|| CatalogError::UnknownRole(name.clone()))?;
                if let Some(existing) = self.role_index(&role.name) {
                    if existing != index {
                        return Err(CatalogError::Duplicate {
                            kind: "role",
                            name: role.name.clone(),
                        });
                    }
                }
                self.check_role_filters(role)?;
                self.roles[index] = role.clone();
            }
        }
        Ok(())
    }

    fn check_role_filters(&self, role: &RoleDef) -> Result<(), CatalogError> {
        for filter in &role.table_filters {
            if self.table(&filter.table).is_none() {
                return Err(CatalogError::UnknownTable(filter.table.clone()));
            }
        }
        Ok(())
    }

    /// Undo already-applied edits by replaying their inverses newest first.
    /// Returns descriptions of inverses the catalog refused.
    pub fn roll_back(&mut self, inverses: &[CatalogEdit]) -> Vec<String> {
        let mut failures = Vec::new();
        for inverse in inverses.iter().rev() {
            if let Err(e) = self.apply(inverse) {
                tracing::error!("Rollback step '{}' failed: {}", inverse.describe(), e);
                failures.push(format!("{}: {}", inverse.describe(), e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::sample_catalog;
    use crate::catalog::DataKind;
    use crate::expr::AggregateFn;

    /// Applies each edit, records its inverse, then rolls everything back.
    fn apply_and_undo(edits: &[CatalogEdit]) {
        let original = sample_catalog();
        let mut catalog = original.clone();
        let mut inverses = Vec::new();
        for edit in edits {
            inverses.push(edit.inverse(&catalog).unwrap());
            catalog.apply(edit).unwrap();
        }
        assert_ne!(catalog, original);
        let failures = catalog.roll_back(&inverses);
        assert!(failures.is_empty(), "{:?}", failures);
        assert_eq!(catalog, original);
    }

    #[test]
    fn test_rename_table_cascades_and_reverts() {
        let mut catalog = sample_catalog();
        let edit = CatalogEdit::RenameTable {
            from: "sales".into(),
            to: "Orders".into(),
        };
        catalog.apply(&edit).unwrap();
        assert!(catalog.table("Sales").is_none());
        assert!(catalog.relationships().iter().all(|r| r.from_table == "Orders"));
        assert_eq!(catalog.measures()[0].table, "Orders");
        assert_eq!(catalog.roles()[0].table_filters[0].table, "Orders");

        apply_and_undo(&[edit]);
    }

    #[test]
    fn test_delete_column_in_use_is_refused() {
        let mut catalog = sample_catalog();
        let err = catalog
            .apply(&CatalogEdit::DeleteColumn {
                table: "Sales".into(),
                name: "OrderDate".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::InUse { .. }));
    }

    #[test]
    fn test_positional_inverse_restores_order() {
        apply_and_undo(&[
            CatalogEdit::DeleteColumn {
                table: "Sales".into(),
                name: "Quantity".into(),
            },
            CatalogEdit::InsertColumn {
                table: "Sales".into(),
                index: 0,
                column: ColumnDef::new("Discount", DataKind::Numeric),
            },
            CatalogEdit::RenameColumn {
                table: "Sales".into(),
                from: "Amount".into(),
                to: "NetAmount".into(),
            },
        ]);
    }

    #[test]
    fn test_measure_edits_round_trip() {
        let total = MeasureDef {
            name: "Total Amount".into(),
            table: "Sales".into(),
            expression: Expr::aggregate(AggregateFn::Sum, ColumnRef::new("Sales", "Amount")),
            format_string: "#,##0.00".into(),
            aliases: vec![],
        };
        apply_and_undo(&[
            CatalogEdit::InsertMeasure {
                index: 1,
                measure: total.clone(),
            },
            CatalogEdit::RedefineMeasure {
                measure: total.measure_ref(),
                expression: Expr::aggregate(AggregateFn::Average, ColumnRef::new("Sales", "Amount")),
                format_string: "0.0".into(),
            },
            CatalogEdit::RenameMeasure {
                measure: total.measure_ref(),
                to: "Avg Amount".into(),
            },
        ]);
    }

    #[test]
    fn test_second_active_relationship_is_refused() {
        let mut catalog = sample_catalog();
        let rel = RelationshipDef {
            from_table: "Sales".into(),
            from_column: "OrderId".into(),
            to_table: "Date".into(),
            to_column: "Date".into(),
            cardinality: Default::default(),
            cross_filter: Default::default(),
            active: true,
        };
        let err = catalog
            .apply(&CatalogEdit::InsertRelationship {
                index: 2,
                relationship: rel.clone(),
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateActiveRelationship { .. }));

        let inactive = RelationshipDef { active: false, ..rel };
        catalog
            .apply(&CatalogEdit::InsertRelationship {
                index: 2,
                relationship: inactive.clone(),
            })
            .unwrap();
        let err = catalog
            .apply(&CatalogEdit::SetRelationshipActive {
                key: inactive.key(),
                active: true,
            })
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateActiveRelationship { .. }));
    }
}
