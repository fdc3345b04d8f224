//! Entity Resolver
//!
//! Binds name-like slots to catalog objects. Matching is case-insensitive and
//! alias-aware:
//!
//! - exact (or separator-insensitive) match scores 1.0 and is accepted at once
//! - one name containing the other scores 0.9
//! - anything else is scored with Jaro-Winkler similarity
//!
//! An inexact winner must clear the acceptance threshold and lead the runner-up
//! by the tie margin. Otherwise the slot comes back as an [`AmbiguityError`]
//! listing the candidates, never as a guess.

use crate::catalog::{same_name, ColumnRef, MeasureRef, SchemaCatalog};
use crate::config::EngineConfig;
use crate::error::{AmbiguityError, AmbiguityReason, Candidate};
use crate::intent::{Expected, NameSlot, SlotRole};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use strsim::jaro_winkler;
use tracing::{debug, info};

const CONTAINMENT_SCORE: f64 = 0.9;
/// Candidates below this are not worth showing to the user.
const RELEVANCE_FLOOR: f64 = 0.5;
const MAX_SUGGESTIONS: usize = 3;

/// A concrete catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum EntityRef {
    Table(String),
    Column(ColumnRef),
    Measure(MeasureRef),
    Role(String),
}

impl EntityRef {
    /// Table the object lives in (the table itself for tables).
    pub fn table(&self) -> Option<&str> {
        match self {
            EntityRef::Table(t) => Some(t),
            EntityRef::Column(c) => Some(&c.table),
            EntityRef::Measure(m) => Some(&m.table),
            EntityRef::Role(_) => None,
        }
    }

    /// Preference when several kinds match exactly.
    fn precedence(&self) -> u8 {
        match self {
            EntityRef::Measure(_) => 0,
            EntityRef::Column(_) => 1,
            EntityRef::Table(_) => 2,
            EntityRef::Role(_) => 3,
        }
    }

    fn sort_key(&self) -> String {
        match self {
            EntityRef::Table(t) | EntityRef::Role(t) => t.to_lowercase(),
            EntityRef::Column(c) => format!("{}.{}", c.table, c.column).to_lowercase(),
            EntityRef::Measure(m) => m.key(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Table(t) => write!(f, "'{}'", t),
            EntityRef::Column(c) => write!(f, "{}", c),
            EntityRef::Measure(m) => write!(f, "[{}]", m.name),
            EntityRef::Role(r) => write!(f, "role '{}'", r),
        }
    }
}

/// A slot bound to a catalog object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntity {
    pub role: SlotRole,
    pub text: String,
    pub entity: EntityRef,
    pub confidence: f64,
    /// Runners-up considered while resolving
    pub alternatives: Vec<Candidate>,
}

/// Entity bound for `role`, if any.
pub fn bound(resolved: &[ResolvedEntity], role: SlotRole) -> Option<&ResolvedEntity> {
    resolved.iter().find(|r| r.role == role)
}

/// Lower-case, split camel case, and turn `_`/`-` into spaces.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.trim().chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
        } else {
            if c.is_uppercase() && prev.map_or(false, |p| p.is_lowercase()) && !out.ends_with(' ') {
                out.push(' ');
            }
            out.extend(c.to_lowercase());
        }
        prev = Some(c);
    }
    out.trim_end().to_string()
}

/// Similarity between a request term and a model name, in 0.0..=1.0.
pub fn similarity(term: &str, name: &str) -> f64 {
    let a = normalize(term);
    let b = normalize(name);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b || a.replace(' ', "") == b.replace(' ', "") {
        return 1.0;
    }
    if a.len() >= 3 && b.len() >= 3 && (a.contains(&b) || b.contains(&a)) {
        return CONTAINMENT_SCORE;
    }
    jaro_winkler(&a, &b)
}

pub struct EntityResolver {
    accept_threshold: f64,
    tie_margin: f64,
    synonyms: BTreeMap<String, String>,
}

impl EntityResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            accept_threshold: config.accept_threshold,
            tie_margin: config.tie_margin,
            synonyms: config
                .synonyms
                .iter()
                .map(|(k, v)| (normalize(k), v.clone()))
                .collect(),
        }
    }

    /// Resolve every slot in order. Scoped slots search the table bound by
    /// their scope slot first.
    pub fn resolve(
        &self,
        slots: &[NameSlot],
        catalog: &SchemaCatalog,
    ) -> Result<Vec<ResolvedEntity>, AmbiguityError> {
        let mut out: Vec<ResolvedEntity> = Vec::new();
        for slot in slots {
            let scope_table = slot
                .scope
                .and_then(|role| bound(&out, role))
                .and_then(|r| r.entity.table())
                .map(str::to_string);
            let resolved = match scope_table {
                Some(table) => match self.resolve_one(slot, catalog, Some(&table)) {
                    Ok(r) => r,
                    Err(e) if slot.scope_fallback && e.reason != AmbiguityReason::Tied => {
                        debug!("'{}' not found in '{}', searching the whole model", slot.text, table);
                        self.resolve_one(slot, catalog, None)?
                    }
                    Err(e) => return Err(e),
                },
                None => self.resolve_one(slot, catalog, None)?,
            };
            out.push(resolved);
        }
        Ok(out)
    }

    pub fn resolve_one(
        &self,
        slot: &NameSlot,
        catalog: &SchemaCatalog,
        scope: Option<&str>,
    ) -> Result<ResolvedEntity, AmbiguityError> {
        let mut candidates = self.score_candidates(slot, catalog, scope);
        let ambiguity = |reason, candidates: Vec<Candidate>| AmbiguityError {
            text: slot.text.clone(),
            role: slot.role,
            reason,
            candidates,
        };

        let mut exact: Vec<&Candidate> = candidates.iter().filter(|c| c.score >= 1.0).collect();
        if !exact.is_empty() {
            exact.sort_by_key(|c| c.entity.precedence());
            let best = exact[0].entity.precedence();
            exact.retain(|c| c.entity.precedence() == best);
            if exact.len() > 1 {
                info!("'{}' matches {} objects exactly", slot.text, exact.len());
                let tied = exact.into_iter().cloned().collect();
                return Err(ambiguity(AmbiguityReason::Tied, tied));
            }
            let winner = exact[0].clone();
            let alternatives = candidates
                .iter()
                .filter(|c| c.entity != winner.entity && c.score >= RELEVANCE_FLOOR)
                .take(MAX_SUGGESTIONS)
                .cloned()
                .collect();
            debug!("'{}' resolved exactly to {}", slot.text, winner.entity);
            return Ok(self.accept(slot, winner, alternatives));
        }

        candidates.retain(|c| c.score >= RELEVANCE_FLOOR);
        let Some(top) = candidates.first().cloned() else {
            info!("'{}' matches nothing in the model", slot.text);
            return Err(ambiguity(AmbiguityReason::NoMatch, Vec::new()));
        };
        if top.score < self.accept_threshold {
            info!("'{}' best match {} ({:.2}) is below threshold", slot.text, top.entity, top.score);
            candidates.truncate(MAX_SUGGESTIONS);
            return Err(ambiguity(AmbiguityReason::BelowThreshold, candidates));
        }
        if let Some(runner_up) = candidates.get(1) {
            if top.score - runner_up.score < self.tie_margin {
                let tied: Vec<Candidate> = candidates
                    .iter()
                    .filter(|c| top.score - c.score < self.tie_margin)
                    .cloned()
                    .collect();
                info!("'{}' is ambiguous between {} candidates", slot.text, tied.len());
                return Err(ambiguity(AmbiguityReason::Tied, tied));
            }
        }
        let alternatives = candidates.iter().skip(1).take(MAX_SUGGESTIONS).cloned().collect();
        debug!("'{}' resolved to {} ({:.2})", slot.text, top.entity, top.score);
        Ok(self.accept(slot, top, alternatives))
    }

    fn accept(&self, slot: &NameSlot, winner: Candidate, alternatives: Vec<Candidate>) -> ResolvedEntity {
        ResolvedEntity {
            role: slot.role,
            text: slot.text.clone(),
            entity: winner.entity,
            confidence: winner.score,
            alternatives,
        }
    }

    /// The request term plus the synonym target it maps to, if configured.
    fn terms(&self, text: &str) -> Vec<String> {
        let mut terms = vec![text.to_string()];
        if let Some(target) = self.synonyms.get(&normalize(text)) {
            terms.push(target.clone());
        }
        terms
    }

    /// All candidates of the expected kinds, best first. Order is fully
    /// determined by score, kind precedence and name.
    fn score_candidates(&self, slot: &NameSlot, catalog: &SchemaCatalog, scope: Option<&str>) -> Vec<Candidate> {
        let terms = self.terms(&slot.text);
        let best = |names: &[&str]| -> f64 {
            terms
                .iter()
                .flat_map(|t| names.iter().map(move |n| similarity(t, n)))
                .fold(0.0, f64::max)
        };
        let exact_only = |names: &[String]| -> f64 {
            let hit = terms
                .iter()
                .any(|t| names.iter().any(|n| normalize(t) == normalize(n)));
            if hit {
                1.0
            } else {
                0.0
            }
        };
        let in_scope = |table: &str| scope.map_or(true, |s| same_name(s, table));
        let wants = |kind: Expected| slot.expected == kind || slot.expected == Expected::Value;

        let mut out: Vec<Candidate> = Vec::new();
        if wants(Expected::Measure) {
            for m in catalog.measures().iter().filter(|m| in_scope(&m.table)) {
                let mut names: Vec<&str> = vec![m.name.as_str()];
                names.extend(m.aliases.iter().map(String::as_str));
                out.push(Candidate {
                    entity: EntityRef::Measure(m.measure_ref()),
                    score: best(&names),
                });
            }
        }
        if wants(Expected::Column) {
            for table in catalog.tables().iter().filter(|t| in_scope(&t.name)) {
                for c in &table.columns {
                    let mut names: Vec<&str> = vec![c.name.as_str()];
                    names.extend(c.aliases.iter().map(String::as_str));
                    // "sales amount" names 'Sales'[Amount], but only verbatim
                    let qualified = [format!("{} {}", table.name, c.name)];
                    let score = best(&names).max(exact_only(&qualified));
                    out.push(Candidate {
                        entity: EntityRef::Column(ColumnRef::new(&table.name, &c.name)),
                        score,
                    });
                }
            }
        }
        if slot.expected == Expected::Table || (slot.expected == Expected::Value && scope.is_none()) {
            for table in catalog.tables() {
                let mut names: Vec<&str> = vec![table.name.as_str()];
                names.extend(table.aliases.iter().map(String::as_str));
                out.push(Candidate {
                    entity: EntityRef::Table(table.name.clone()),
                    score: best(&names),
                });
            }
        }
        if slot.expected == Expected::Role {
            for role in catalog.roles() {
                out.push(Candidate {
                    entity: EntityRef::Role(role.name.clone()),
                    score: best(&[role.name.as_str()]),
                });
            }
        }

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.precedence().cmp(&b.entity.precedence()))
                .then_with(|| a.entity.sort_key().cmp(&b.entity.sort_key()))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::sample_catalog;
    use crate::catalog::{ColumnDef, DataKind, SchemaSnapshot, TableDef};

    fn resolver() -> EntityResolver {
        EntityResolver::new(&EngineConfig::default())
    }

    fn slot(text: &str, expected: Expected) -> NameSlot {
        NameSlot {
            role: SlotRole::Subject,
            text: text.to_string(),
            expected,
            scope: None,
            scope_fallback: true,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("SalesAmount"), "sales amount");
        assert_eq!(normalize("order_date"), "order date");
        assert_eq!(normalize("  Net-Revenue "), "net revenue");
    }

    #[test]
    fn test_similarity_rules() {
        assert_eq!(similarity("sales", "SALES"), 1.0);
        assert_eq!(similarity("order date", "OrderDate"), 1.0);
        assert_eq!(similarity("amount", "SalesAmount"), 0.9);
        let typo = similarity("Sles", "Sales");
        assert!(typo > 0.9 && typo < 1.0);
    }

    #[test]
    fn test_misspelt_table_is_autocorrected() {
        let catalog = sample_catalog();
        let resolved = resolver()
            .resolve_one(&slot("Sles", Expected::Table), &catalog, None)
            .unwrap();
        assert_eq!(resolved.entity, EntityRef::Table("Sales".into()));
        assert!(resolved.confidence < 1.0);
    }

    #[test]
    fn test_alias_is_exact() {
        let catalog = sample_catalog();
        let resolved = resolver()
            .resolve_one(&slot("qty", Expected::Value), &catalog, None)
            .unwrap();
        assert_eq!(resolved.entity, EntityRef::Column(ColumnRef::new("Sales", "Quantity")));
    }

    #[test]
    fn test_exact_column_beats_table_of_same_name() {
        let catalog = sample_catalog();
        let resolved = resolver()
            .resolve_one(&slot("date", Expected::Value), &catalog, None)
            .unwrap();
        assert_eq!(resolved.entity, EntityRef::Column(ColumnRef::new("Date", "Date")));
    }

    #[test]
    fn test_tied_candidates_are_never_guessed() {
        let snapshot = SchemaSnapshot {
            tables: vec![TableDef::new(
                "Sales",
                vec![
                    ColumnDef::new("SalesAmount", DataKind::Numeric),
                    ColumnDef::new("TaxAmount", DataKind::Numeric),
                ],
            )],
            ..Default::default()
        };
        let catalog = SchemaCatalog::from_snapshot(snapshot).unwrap();
        let err = resolver()
            .resolve_one(&slot("amount", Expected::Column), &catalog, None)
            .unwrap_err();
        assert_eq!(err.reason, AmbiguityReason::Tied);
        let names: Vec<String> = err.candidates.iter().map(|c| c.entity.to_string()).collect();
        assert_eq!(names, vec!["'Sales'[SalesAmount]", "'Sales'[TaxAmount]"]);
    }

    #[test]
    fn test_same_column_name_in_two_tables_is_tied() {
        let catalog = sample_catalog();
        let err = resolver()
            .resolve_one(&slot("ProductKey", Expected::Column), &catalog, None)
            .unwrap_err();
        assert_eq!(err.reason, AmbiguityReason::Tied);
        assert_eq!(err.candidates.len(), 2);
    }

    #[test]
    fn test_scope_disambiguates() {
        let catalog = sample_catalog();
        let slots = vec![
            NameSlot {
                role: SlotRole::TableHint,
                ..slot("products", Expected::Table)
            },
            NameSlot {
                scope: Some(SlotRole::TableHint),
                scope_fallback: false,
                ..slot("ProductKey", Expected::Column)
            },
        ];
        let resolved = resolver().resolve(&slots, &catalog).unwrap();
        assert_eq!(
            resolved[1].entity,
            EntityRef::Column(ColumnRef::new("Products", "ProductKey"))
        );
    }

    #[test]
    fn test_unknown_and_weak_matches() {
        let catalog = sample_catalog();
        let err = resolver()
            .resolve_one(&slot("zzzz", Expected::Table), &catalog, None)
            .unwrap_err();
        assert_eq!(err.reason, AmbiguityReason::NoMatch);
        assert!(err.candidates.is_empty());
    }

    #[test]
    fn test_synonyms() {
        let mut config = EngineConfig::default();
        config.synonyms.insert("turnover".into(), "Revenue".into());
        let catalog = sample_catalog();
        let resolved = EntityResolver::new(&config)
            .resolve_one(&slot("turnover", Expected::Value), &catalog, None)
            .unwrap();
        assert_eq!(resolved.entity, EntityRef::Column(ColumnRef::new("Finance", "Revenue")));
    }
}
