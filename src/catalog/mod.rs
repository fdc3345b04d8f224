//! Schema Catalog
//!
//! In-memory, versioned picture of the connected tabular model: tables, columns,
//! relationships, measures and roles. Every synthesized expression is checked
//! against it, and it only changes through [`edit::CatalogEdit`]s produced by the
//! mutation planner.
//!
//! ## Invariants
//!
//! - every column reference (relationships, measure expressions, role filters)
//!   resolves to an existing table and column
//! - at most one active relationship per ordered table pair
//! - measure names are unique within their table scope

pub mod edit;
pub mod store;

use crate::error::CatalogError;
use crate::expr::Expr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

pub use edit::CatalogEdit;
pub use store::CatalogStore;

/// Case-insensitive identifier comparison, the way tabular engines match names.
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Kind of data held by a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Numeric,
    Text,
    Date,
    Boolean,
}

impl DataKind {
    /// Parse the loose type names a schema provider or a user may use.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "numeric" | "number" | "decimal" | "double" | "int" | "int64" | "integer"
            | "whole number" | "currency" | "float" => Some(DataKind::Numeric),
            "text" | "string" | "varchar" => Some(DataKind::Text),
            "date" | "datetime" | "timestamp" => Some(DataKind::Date),
            "boolean" | "bool" | "true/false" => Some(DataKind::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataKind::Numeric => "numeric",
            DataKind::Text => "text",
            DataKind::Date => "date",
            DataKind::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: DataKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Alternative names users refer to this column by
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: DataKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Names of the measures scoped to this table
    #[serde(default)]
    pub measures: BTreeSet<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Marked as the model's calendar table
    #[serde(default)]
    pub is_date_table: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            measures: BTreeSet::new(),
            aliases: Vec::new(),
            is_date_table: false,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| same_name(&c.name, name))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| same_name(&c.name, name))
    }

    pub fn has_measure(&self, name: &str) -> bool {
        self.measures.iter().any(|m| same_name(m, name))
    }

    pub fn first_date_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.kind == DataKind::Date)
    }
}

/// Qualified column reference, rendered as `'Table'[Column]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn matches(&self, other: &ColumnRef) -> bool {
        same_name(&self.table, &other.table) && same_name(&self.column, &other.column)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'[{}]", self.table, self.column)
    }
}

/// Measure reference: owning table plus measure name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasureRef {
    pub table: String,
    pub name: String,
}

impl MeasureRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn matches(&self, other: &MeasureRef) -> bool {
        same_name(&self.table, &other.table) && same_name(&self.name, &other.name)
    }

    /// Stable lower-cased key used by dependency graphs.
    pub fn key(&self) -> String {
        format!("{}.{}", self.table.to_lowercase(), self.name.to_lowercase())
    }
}

impl fmt::Display for MeasureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'[{}]", self.table, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossFilterDirection {
    #[default]
    Single,
    Both,
}

/// `(from_table, from_column) -> (to_table, to_column)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub cross_filter: CrossFilterDirection,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RelationshipDef {
    pub fn from_ref(&self) -> ColumnRef {
        ColumnRef::new(&self.from_table, &self.from_column)
    }

    pub fn to_ref(&self) -> ColumnRef {
        ColumnRef::new(&self.to_table, &self.to_column)
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey {
            from: self.from_ref(),
            to: self.to_ref(),
        }
    }

    pub fn touches(&self, table: &str) -> bool {
        same_name(&self.from_table, table) || same_name(&self.to_table, table)
    }

    pub fn uses_column(&self, column: &ColumnRef) -> bool {
        self.from_ref().matches(column) || self.to_ref().matches(column)
    }

    /// Connects the two tables, in either orientation.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (same_name(&self.from_table, a) && same_name(&self.to_table, b))
            || (same_name(&self.from_table, b) && same_name(&self.to_table, a))
    }
}

impl fmt::Display for RelationshipDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from_ref(), self.to_ref())
    }
}

/// Identity of a relationship: its two endpoint columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub from: ColumnRef,
    pub to: ColumnRef,
}

impl RelationshipKey {
    pub fn matches(&self, rel: &RelationshipDef) -> bool {
        self.from.matches(&rel.from_ref()) && self.to.matches(&rel.to_ref())
    }
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDef {
    pub name: String,
    pub table: String,
    pub expression: Expr,
    #[serde(default)]
    pub format_string: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl MeasureDef {
    pub fn measure_ref(&self) -> MeasureRef {
        MeasureRef::new(&self.table, &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelPermission {
    #[default]
    Read,
    ReadRefresh,
    Administrator,
}

/// Row-level filter a role applies to one table (DAX text, not interpreted here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTableFilter {
    pub table: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDef {
    pub name: String,
    #[serde(default)]
    pub permission: ModelPermission,
    #[serde(default)]
    pub table_filters: Vec<RoleTableFilter>,
}

impl RoleDef {
    pub fn new(name: impl Into<String>, permission: ModelPermission) -> Self {
        Self {
            name: name.into(),
            permission,
            table_filters: Vec::new(),
        }
    }
}

/// Raw schema as delivered by a schema provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    #[serde(default)]
    pub measures: Vec<MeasureDef>,
    #[serde(default)]
    pub roles: Vec<RoleDef>,
}

/// What an explore-schema request asked to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploreScope {
    Tables,
    Columns,
    Measures,
    Relationships,
    Roles,
}

/// Read-only view handed back for explore-schema requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum SchemaView {
    Tables { tables: Vec<TableSummary> },
    Columns { table: String, columns: Vec<ColumnDef> },
    Measures { measures: Vec<MeasureSummary> },
    Relationships { relationships: Vec<RelationshipDef> },
    Roles { roles: Vec<RoleDef> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub column_count: usize,
    pub measure_count: usize,
    pub is_date_table: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureSummary {
    pub table: String,
    pub name: String,
    pub format_string: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaCatalog {
    tables: Vec<TableDef>,
    relationships: Vec<RelationshipDef>,
    measures: Vec<MeasureDef>,
    roles: Vec<RoleDef>,
    version: u64,
}

impl SchemaCatalog {
    /// Build a catalog from a provider snapshot, rejecting snapshots that break
    /// the catalog invariants.
    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Result<Self, CatalogError> {
        let mut catalog = Self {
            tables: snapshot.tables,
            relationships: snapshot.relationships,
            measures: snapshot.measures,
            roles: snapshot.roles,
            version: 1,
        };

        // Measure scopes are derived from the measure list itself.
        for table in &mut catalog.tables {
            table.measures.clear();
        }
        for i in 0..catalog.measures.len() {
            let (table_name, measure_name) = {
                let m = &catalog.measures[i];
                (m.table.clone(), m.name.clone())
            };
            let table = catalog
                .table_mut(&table_name)
                .ok_or_else(|| CatalogError::UnknownTable(table_name.clone()))?;
            if table.has_measure(&measure_name) {
                return Err(CatalogError::Duplicate {
                    kind: "measure",
                    name: format!("{}[{}]", table_name, measure_name),
                });
            }
            table.measures.insert(measure_name);
        }

        catalog.check_invariants()?;
        Ok(catalog)
    }

    pub fn to_snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot {
            tables: self.tables.clone(),
            relationships: self.relationships.clone(),
            measures: self.measures.clone(),
            roles: self.roles.clone(),
        }
    }

    pub fn check_invariants(&self) -> Result<(), CatalogError> {
        let mut seen_tables = HashSet::new();
        for table in &self.tables {
            if !seen_tables.insert(table.name.to_lowercase()) {
                return Err(CatalogError::Duplicate {
                    kind: "table",
                    name: table.name.clone(),
                });
            }
            let mut seen_columns = HashSet::new();
            for column in &table.columns {
                if !seen_columns.insert(column.name.to_lowercase()) {
                    return Err(CatalogError::Duplicate {
                        kind: "column",
                        name: format!("{}[{}]", table.name, column.name),
                    });
                }
            }
        }

        let mut active_pairs = HashSet::new();
        let mut keys = HashSet::new();
        for rel in &self.relationships {
            for end in [rel.from_ref(), rel.to_ref()] {
                self.require_column(&end)?;
            }
            let key = rel.key();
            let normalized = (
                key.from.table.to_lowercase(),
                key.from.column.to_lowercase(),
                key.to.table.to_lowercase(),
                key.to.column.to_lowercase(),
            );
            if !keys.insert(normalized) {
                return Err(CatalogError::Duplicate {
                    kind: "relationship",
                    name: rel.to_string(),
                });
            }
            if rel.active {
                let pair = (rel.from_table.to_lowercase(), rel.to_table.to_lowercase());
                if !active_pairs.insert(pair) {
                    return Err(CatalogError::DuplicateActiveRelationship {
                        from: rel.from_table.clone(),
                        to: rel.to_table.clone(),
                    });
                }
            }
        }

        let mut seen_measures = HashSet::new();
        for measure in &self.measures {
            if self.table(&measure.table).is_none() {
                return Err(CatalogError::UnknownTable(measure.table.clone()));
            }
            if !seen_measures.insert(measure.measure_ref().key()) {
                return Err(CatalogError::Duplicate {
                    kind: "measure",
                    name: measure.measure_ref().to_string(),
                });
            }
            for column in measure.expression.column_refs() {
                self.require_column(&column)?;
            }
        }

        let mut seen_roles = HashSet::new();
        for role in &self.roles {
            if !seen_roles.insert(role.name.to_lowercase()) {
                return Err(CatalogError::Duplicate {
                    kind: "role",
                    name: role.name.clone(),
                });
            }
            for filter in &role.table_filters {
                if self.table(&filter.table).is_none() {
                    return Err(CatalogError::UnknownTable(filter.table.clone()));
                }
            }
        }
        Ok(())
    }

    fn require_column(&self, column: &ColumnRef) -> Result<(), CatalogError> {
        let table = self
            .table(&column.table)
            .ok_or_else(|| CatalogError::UnknownTable(column.table.clone()))?;
        table
            .column(&column.column)
            .map(|_| ())
            .ok_or_else(|| CatalogError::UnknownColumn(column.clone()))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    pub fn measures(&self) -> &[MeasureDef] {
        &self.measures
    }

    pub fn roles(&self) -> &[RoleDef] {
        &self.roles
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| same_name(&t.name, name))
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| same_name(&t.name, name))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Option<&mut TableDef> {
        self.tables.iter_mut().find(|t| same_name(&t.name, name))
    }

    pub fn column(&self, column: &ColumnRef) -> Option<&ColumnDef> {
        self.table(&column.table)?.column(&column.column)
    }

    pub fn measure(&self, measure: &MeasureRef) -> Option<&MeasureDef> {
        self.measures.iter().find(|m| m.measure_ref().matches(measure))
    }

    pub fn measure_index(&self, measure: &MeasureRef) -> Option<usize> {
        self.measures.iter().position(|m| m.measure_ref().matches(measure))
    }

    pub fn measures_of(&self, table: &str) -> impl Iterator<Item = &MeasureDef> {
        let table = table.to_string();
        self.measures.iter().filter(move |m| same_name(&m.table, &table))
    }

    pub fn role(&self, name: &str) -> Option<&RoleDef> {
        self.roles.iter().find(|r| same_name(&r.name, name))
    }

    pub fn role_index(&self, name: &str) -> Option<usize> {
        self.roles.iter().position(|r| same_name(&r.name, name))
    }

    pub fn relationship(&self, key: &RelationshipKey) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| key.matches(r))
    }

    pub fn relationship_index(&self, key: &RelationshipKey) -> Option<usize> {
        self.relationships.iter().position(|r| key.matches(r))
    }

    pub fn active_relationship(&self, from_table: &str, to_table: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| {
            r.active && same_name(&r.from_table, from_table) && same_name(&r.to_table, to_table)
        })
    }

    /// Tables directly connected to `table` through active relationships, in
    /// catalog order.
    pub fn active_neighbours(&self, table: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rel in self.relationships.iter().filter(|r| r.active) {
            let other = if same_name(&rel.from_table, table) {
                &rel.to_table
            } else if same_name(&rel.to_table, table) {
                &rel.from_table
            } else {
                continue;
            };
            if !out.iter().any(|t| same_name(t, other)) {
                out.push(other.as_str());
            }
        }
        out
    }

    /// Breadth-first walk over active relationships starting at `table`
    /// (inclusive). Order is deterministic.
    pub fn reachable_tables(&self, table: &str) -> Vec<String> {
        let Some(start) = self.table(table) else {
            return Vec::new();
        };
        let mut visited = vec![start.name.clone()];
        let mut queue = VecDeque::from([start.name.clone()]);
        while let Some(current) = queue.pop_front() {
            for next in self.active_neighbours(&current) {
                if !visited.iter().any(|v| same_name(v, next)) {
                    visited.push(next.to_string());
                    queue.push_back(next.to_string());
                }
            }
        }
        visited
    }

    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        self.reachable_tables(from).iter().any(|t| same_name(t, to))
    }

    /// Date column time intelligence should use for `table`: the first marked
    /// date table reachable through active relationships, else the table's own
    /// first date column.
    pub fn canonical_date_column(&self, table: &str) -> Option<ColumnRef> {
        let reachable = self.reachable_tables(table);
        for name in &reachable {
            if let Some(t) = self.table(name) {
                if t.is_date_table {
                    if let Some(col) = t.first_date_column() {
                        return Some(ColumnRef::new(&t.name, &col.name));
                    }
                }
            }
        }
        let own = self.table(table)?;
        own.first_date_column()
            .map(|c| ColumnRef::new(&own.name, &c.name))
    }

    /// Measure dependency graph keyed by [`MeasureRef::key`].
    pub fn measure_dependencies(&self) -> BTreeMap<String, Vec<MeasureRef>> {
        self.measures
            .iter()
            .map(|m| (m.measure_ref().key(), m.expression.measure_refs()))
            .collect()
    }

    /// Names of everything that references `column` (relationships, measures).
    pub fn column_dependents(&self, column: &ColumnRef) -> Vec<String> {
        let mut out = Vec::new();
        for rel in &self.relationships {
            if rel.uses_column(column) {
                out.push(format!("relationship {}", rel));
            }
        }
        for m in &self.measures {
            if m.expression.column_refs().iter().any(|c| c.matches(column)) {
                out.push(format!("measure {}", m.measure_ref()));
            }
        }
        out
    }

    /// Measures (other than `measure` itself) whose expression references it.
    pub fn measure_dependents(&self, measure: &MeasureRef) -> Vec<MeasureRef> {
        self.measures
            .iter()
            .filter(|m| !m.measure_ref().matches(measure))
            .filter(|m| m.expression.measure_refs().iter().any(|r| r.matches(measure)))
            .map(|m| m.measure_ref())
            .collect()
    }

    pub fn describe(&self, scope: ExploreScope, table: Option<&str>) -> Result<SchemaView, CatalogError> {
        let in_scope = |t: &str| table.map_or(true, |wanted| same_name(wanted, t));
        let view = match scope {
            ExploreScope::Tables => SchemaView::Tables {
                tables: self
                    .tables
                    .iter()
                    .filter(|t| in_scope(&t.name))
                    .map(|t| TableSummary {
                        name: t.name.clone(),
                        column_count: t.columns.len(),
                        measure_count: t.measures.len(),
                        is_date_table: t.is_date_table,
                    })
                    .collect(),
            },
            ExploreScope::Columns => {
                let name = table.ok_or_else(|| CatalogError::UnknownTable(String::new()))?;
                let t = self
                    .table(name)
                    .ok_or_else(|| CatalogError::UnknownTable(name.to_string()))?;
                SchemaView::Columns {
                    table: t.name.clone(),
                    columns: t.columns.clone(),
                }
            }
            ExploreScope::Measures => SchemaView::Measures {
                measures: self
                    .measures
                    .iter()
                    .filter(|m| in_scope(&m.table))
                    .map(|m| MeasureSummary {
                        table: m.table.clone(),
                        name: m.name.clone(),
                        format_string: m.format_string.clone(),
                    })
                    .collect(),
            },
            ExploreScope::Relationships => SchemaView::Relationships {
                relationships: self
                    .relationships
                    .iter()
                    .filter(|r| table.map_or(true, |t| r.touches(t)))
                    .cloned()
                    .collect(),
            },
            ExploreScope::Roles => SchemaView::Roles {
                roles: self.roles.clone(),
            },
        };
        Ok(view)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_catalog;
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = sample_catalog();
        assert!(catalog.table("sales").is_some());
        assert!(catalog.column(&ColumnRef::new("SALES", "amount")).is_some());
        assert!(catalog.column(&ColumnRef::new("Sales", "Missing")).is_none());
    }

    #[test]
    fn test_measure_scopes_are_derived() {
        let catalog = sample_catalog();
        let sales = catalog.table("Sales").unwrap();
        assert!(sales.has_measure("Order Count"));
    }

    #[test]
    fn test_canonical_date_prefers_related_date_table() {
        let catalog = sample_catalog();
        assert_eq!(
            catalog.canonical_date_column("Sales"),
            Some(ColumnRef::new("Date", "Date"))
        );
        // Products reaches Date through Sales.
        assert_eq!(
            catalog.canonical_date_column("Products"),
            Some(ColumnRef::new("Date", "Date"))
        );
        assert_eq!(catalog.canonical_date_column("Finance"), None);
    }

    #[test]
    fn test_reachability_ignores_inactive_relationships() {
        let mut snapshot = sample_catalog().to_snapshot();
        for rel in &mut snapshot.relationships {
            if rel.to_table == "Date" {
                rel.active = false;
            }
        }
        let catalog = SchemaCatalog::from_snapshot(snapshot).unwrap();
        assert!(!catalog.is_reachable("Sales", "Date"));
        assert!(catalog.is_reachable("Sales", "Products"));
    }

    #[test]
    fn test_snapshot_with_duplicate_active_relationship_is_rejected() {
        let mut snapshot = sample_catalog().to_snapshot();
        let mut dup = snapshot.relationships[0].clone();
        dup.from_column = "OrderId".to_string();
        snapshot.relationships.push(dup);
        let err = SchemaCatalog::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateActiveRelationship { .. }));
    }

    #[test]
    fn test_snapshot_with_dangling_column_is_rejected() {
        let mut snapshot = sample_catalog().to_snapshot();
        snapshot.relationships[0].to_column = "Nope".to_string();
        let err = SchemaCatalog::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownColumn(_)));
    }

    #[test]
    fn test_describe_columns() {
        let catalog = sample_catalog();
        match catalog.describe(ExploreScope::Columns, Some("sales")).unwrap() {
            SchemaView::Columns { table, columns } => {
                assert_eq!(table, "Sales");
                assert!(columns.iter().any(|c| c.name == "Amount"));
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn test_data_kind_parse() {
        assert_eq!(DataKind::parse("Whole Number"), Some(DataKind::Numeric));
        assert_eq!(DataKind::parse("datetime"), Some(DataKind::Date));
        assert_eq!(DataKind::parse("blob"), None);
    }
}
