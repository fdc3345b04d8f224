//! Intent Classifier
//!
//! `Classifier` is the swappable capability; `RuleClassifier` is the
//! deterministic implementation: weighted lexical cues per intent, a fuzzy
//! fallback against a fixed intent vocabulary, and a fixed priority order for
//! breaking ties.

use super::slots;
use super::{Intent, IntentKind, TroubleshootingSlots};
use crate::catalog::SchemaCatalog;
use crate::config::{AggregationVocabulary, EngineConfig};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use strsim::jaro_winkler;
use tracing::debug;

/// Similarity a misspelt token needs to count as an intent keyword.
const FALLBACK_SIMILARITY: f64 = 0.88;
/// Fallback matches are scaled down so a cue hit always wins.
const FALLBACK_WEIGHT: f64 = 0.6;
/// Confidence reported for text nothing recognised.
const UNCLASSIFIED_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntentScore {
    pub kind: IntentKind,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub text: String,
    /// Other intents that scored, best first
    pub alternatives: Vec<IntentScore>,
}

impl Classification {
    pub fn kind(&self) -> IntentKind {
        self.intent.kind()
    }
}

/// Maps request text to an intent. The catalog is only read for slot hints.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Never fails: unrecognisable text comes back as a low-confidence
    /// troubleshooting intent.
    fn classify(&self, text: &str, catalog: Option<&SchemaCatalog>) -> Classification;
}

struct Cue {
    kind: IntentKind,
    pattern: Regex,
    weight: f64,
}

fn cue(kind: IntentKind, pattern: &str, weight: f64) -> Cue {
    Cue {
        kind,
        pattern: Regex::new(pattern).expect("valid cue pattern"),
        weight,
    }
}

lazy_static! {
    static ref CUES: Vec<Cue> = {
        use IntentKind::*;
        vec![
            cue(ConnectionManagement, r"(?i)^\s*(please\s+)?(connect|disconnect|reconnect)\b", 0.95),
            cue(ConnectionManagement, r"(?i)\b(connect|disconnect)\s+(to|from)\b", 0.9),
            cue(ConnectionManagement, r"(?i)\b(refresh|reload)\s+(the\s+)?(schema|model|metadata|connection)\b", 0.9),
            cue(ConnectionManagement, r"(?i)\b(connection\s+status|am\s+i\s+connected|are\s+we\s+connected|is\s+(it|the\s+model)\s+connected)\b", 0.9),
            cue(ModelMutation, r"(?i)\b(add|create|new|rename|remove|delete|drop|activate|deactivate|disable|enable)\b.{0,40}?\b(tables?|columns?|relationships?|roles?)\b", 0.9),
            cue(ModelMutation, r"(?i)\b(rename|remove|delete|drop)\b.{0,20}?\bmeasures?\b", 0.9),
            cue(ModelMutation, r"(?i)\brename\b.+\bto\b", 0.85),
            cue(CreateMeasure, r"(?i)\b(create|add|define|make|new|build)\b.{0,20}?\bmeasure\b", 0.95),
            cue(CreateMeasure, r"(?i)\bredefine\b.{0,20}?\bmeasure\b", 0.95),
            cue(CreateMeasure, r"(?i)\b(change|update|modify)\b.{0,20}?\bmeasure\b.{0,60}?\b(as|to)\b", 0.95),
            cue(CreateMeasure, r"(?i)\bmeasure\s+(for|of|called|named|that)\b", 0.75),
            cue(TimeIntelligenceQuery, r"(?i)\b(yoy|qoq|mom|y/y|m/m|year[\s-]+over[\s-]+year|quarter[\s-]+over[\s-]+quarter|month[\s-]+over[\s-]+month|same\s+period\s+last\s+year|(previous|prior|last)\s+(year|quarter|month))\b", 0.85),
            cue(TimeIntelligenceQuery, r"(?i)\bgrowth\b", 0.7),
            cue(Query, r"(?i)^\s*(show|what|what's|give|get|display|tell|calculate|compute)\b", 0.6),
            cue(ExploreSchema, r"(?i)\b(list|show|describe|display|what|which)\b.{0,30}?\b(tables|columns|measures|relationships|roles|fields)\b", 0.85),
            cue(ExploreSchema, r"(?i)\bhow\s+many\s+(tables|columns|measures|relationships|roles)\b", 0.9),
            cue(ExploreSchema, r"(?i)\b(describe|inspect)\b", 0.75),
            cue(ExploreSchema, r"(?i)\b(schema|data\s+model|model\s+structure)\b", 0.7),
            cue(Troubleshooting, r"(?i)\b(error|errors|fail|failed|failing|broken|wrong|not\s+working|doesn't\s+work|issue|problem|slow)\b", 0.7),
        ]
    };

    static ref INTENT_VOCABULARY: Vec<(IntentKind, &'static str)> = {
        use IntentKind::*;
        vec![
            (ConnectionManagement, "connect"),
            (ConnectionManagement, "disconnect"),
            (ConnectionManagement, "refresh"),
            (ModelMutation, "rename"),
            (ModelMutation, "delete"),
            (ModelMutation, "remove"),
            (ModelMutation, "relationship"),
            (CreateMeasure, "measure"),
            (TimeIntelligenceQuery, "growth"),
            (TimeIntelligenceQuery, "previous"),
            (Query, "show"),
            (Query, "total"),
            (Query, "average"),
            (Query, "count"),
            (ExploreSchema, "tables"),
            (ExploreSchema, "columns"),
            (ExploreSchema, "schema"),
            (ExploreSchema, "list"),
        ]
    };
}

/// Deterministic, rule-based classifier.
pub struct RuleClassifier {
    vocabulary: AggregationVocabulary,
}

impl RuleClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            vocabulary: config.aggregation_vocabulary.clone(),
        }
    }

    /// Best score per intent kind from the lexical cues.
    fn cue_scores(&self, text: &str) -> Vec<IntentScore> {
        let mut scores: Vec<IntentScore> = Vec::new();
        let mut bump = |kind: IntentKind, score: f64| match scores.iter_mut().find(|s| s.kind == kind) {
            Some(existing) => existing.score = existing.score.max(score),
            None => scores.push(IntentScore { kind, score }),
        };
        for cue in CUES.iter() {
            if cue.pattern.is_match(text) {
                bump(cue.kind, cue.weight);
            }
        }
        if self.vocabulary.find_in(text).is_some() {
            bump(IntentKind::Query, 0.8);
        }
        scores
    }

    /// Jaro-Winkler match of request tokens against the intent vocabulary,
    /// used when no cue fired (typos, terse requests).
    fn fallback_scores(&self, text: &str) -> Vec<IntentScore> {
        let mut scores: Vec<IntentScore> = Vec::new();
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.len() < 3 {
                continue;
            }
            for (kind, word) in INTENT_VOCABULARY.iter() {
                let similarity = jaro_winkler(&token, word);
                if similarity < FALLBACK_SIMILARITY {
                    continue;
                }
                let score = FALLBACK_WEIGHT * similarity;
                match scores.iter_mut().find(|s| s.kind == *kind) {
                    Some(existing) => existing.score = existing.score.max(score),
                    None => scores.push(IntentScore { kind: *kind, score }),
                }
            }
        }
        scores
    }

    fn extract(&self, kind: IntentKind, text: &str, catalog: Option<&SchemaCatalog>) -> Option<Intent> {
        let intent = match kind {
            IntentKind::Query => Intent::Query(slots::extract_query(text, catalog, &self.vocabulary)),
            IntentKind::TimeIntelligenceQuery => {
                Intent::TimeIntelligenceQuery(slots::extract_query(text, catalog, &self.vocabulary))
            }
            IntentKind::CreateMeasure => {
                Intent::CreateMeasure(slots::extract_measure(text, catalog, &self.vocabulary))
            }
            IntentKind::ExploreSchema => Intent::ExploreSchema(slots::extract_explore(text)),
            IntentKind::ModelMutation => Intent::ModelMutation(slots::extract_mutation(text)?),
            IntentKind::ConnectionManagement => {
                Intent::ConnectionManagement(slots::extract_connection(text))
            }
            IntentKind::Troubleshooting => {
                Intent::Troubleshooting(slots::extract_troubleshooting(text))
            }
        };
        Some(intent)
    }
}

/// Highest score first; equal scores fall back to intent priority.
fn rank(scores: &mut [IntentScore]) {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.kind.priority().cmp(&b.kind.priority()))
    });
}

impl Classifier for RuleClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn classify(&self, text: &str, catalog: Option<&SchemaCatalog>) -> Classification {
        let trimmed = text.trim();
        let mut scores = if trimmed.is_empty() {
            Vec::new()
        } else {
            let cues = self.cue_scores(trimmed);
            if cues.is_empty() {
                self.fallback_scores(trimmed)
            } else {
                cues
            }
        };
        rank(&mut scores);

        // Walk down the ranking until an intent's slots can be extracted.
        for (i, best) in scores.iter().enumerate() {
            if let Some(intent) = self.extract(best.kind, trimmed, catalog) {
                let alternatives = scores
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, s)| *s)
                    .collect();
                debug!(
                    "Classified '{}' as {} ({:.2})",
                    trimmed, best.kind, best.score
                );
                return Classification {
                    intent,
                    confidence: best.score,
                    text: text.to_string(),
                    alternatives,
                };
            }
        }

        debug!("No intent recognised for '{}'", trimmed);
        Classification {
            intent: Intent::Troubleshooting(TroubleshootingSlots {
                text: text.to_string(),
                symptom: None,
            }),
            confidence: if trimmed.is_empty() {
                0.0
            } else {
                UNCLASSIFIED_CONFIDENCE
            },
            text: text.to_string(),
            alternatives: scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AggregateFn;
    use crate::intent::{ConnectionAction, ExploreScope, MutationAction, ModelObject};

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(&EngineConfig::default())
    }

    #[test]
    fn test_spec_requests() {
        let c = classifier();
        assert_eq!(c.classify("Show total sales", None).kind(), IntentKind::Query);
        assert_eq!(
            c.classify("Create a measure for average sales", None).kind(),
            IntentKind::CreateMeasure
        );
        assert_eq!(
            c.classify("Show YoY growth of Revenue", None).kind(),
            IntentKind::TimeIntelligenceQuery
        );
        assert_eq!(
            c.classify("List all columns in the Sles table", None).kind(),
            IntentKind::ExploreSchema
        );
    }

    #[test]
    fn test_empty_and_gibberish_become_troubleshooting() {
        let c = classifier();
        let empty = c.classify("   ", None);
        assert_eq!(empty.kind(), IntentKind::Troubleshooting);
        assert_eq!(empty.confidence, 0.0);

        let noise = c.classify("zxqv blorp", None);
        assert_eq!(noise.kind(), IntentKind::Troubleshooting);
        assert!(noise.confidence < 0.5);
    }

    #[test]
    fn test_priority_breaks_ties() {
        let mut scores = vec![
            IntentScore { kind: IntentKind::Query, score: 0.9 },
            IntentScore { kind: IntentKind::ModelMutation, score: 0.9 },
            IntentScore { kind: IntentKind::ExploreSchema, score: 0.95 },
        ];
        rank(&mut scores);
        let order: Vec<IntentKind> = scores.iter().map(|s| s.kind).collect();
        assert_eq!(
            order,
            vec![IntentKind::ExploreSchema, IntentKind::ModelMutation, IntentKind::Query]
        );
    }

    #[test]
    fn test_mutation_and_connection() {
        let c = classifier();
        match c.classify("rename the Finance table to Ledger", None).intent {
            Intent::ModelMutation(m) => {
                assert_eq!(m.action, MutationAction::Rename);
                assert_eq!(m.object, ModelObject::Table);
            }
            other => panic!("unexpected intent {:?}", other),
        }
        match c.classify("connect to sample_model.json", None).intent {
            Intent::ConnectionManagement(s) => {
                assert_eq!(s.action, ConnectionAction::Connect);
                assert_eq!(s.target.as_deref(), Some("sample_model.json"));
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_typo_falls_back_to_vocabulary() {
        let c = classifier();
        let result = c.classify("shwo revenue", None);
        assert_eq!(result.kind(), IntentKind::Query);
        assert!(result.confidence > 0.5);
        assert!(result.confidence < 0.8);
    }

    #[test]
    fn test_slots_travel_with_the_intent() {
        let c = classifier();
        match c.classify("how many tables are there?", None).intent {
            Intent::ExploreSchema(e) => assert_eq!(e.scope, ExploreScope::Tables),
            other => panic!("unexpected intent {:?}", other),
        }
        match c.classify("what is the average amount?", None).intent {
            Intent::Query(q) => {
                assert_eq!(q.aggregation.unwrap().function, AggregateFn::Average);
                assert_eq!(q.subject.unwrap().text, "amount");
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_is_deterministic() {
        let c = classifier();
        let a = c.classify("Show total sales where Region = East", None);
        let b = c.classify("Show total sales where Region = East", None);
        assert_eq!(a, b);
    }
}
