//! Engine configuration
//!
//! Thresholds and vocabularies that tune classification and resolution.
//! Loaded from defaults, then an optional JSON file, then `TABULAR_*`
//! environment variables.

use crate::error::ConfigError;
use crate::expr::AggregateFn;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum similarity for an inexact name match to be accepted
    pub accept_threshold: f64,
    /// Lead the best candidate needs over the runner-up
    pub tie_margin: f64,
    /// Below this the request is answered with a clarification
    pub min_intent_confidence: f64,
    pub aggregation_vocabulary: AggregationVocabulary,
    /// Column names preferred when a request aggregates a whole table
    pub value_column_hints: Vec<String>,
    pub default_date_table: String,
    pub default_date_column: String,
    /// Extra phrase -> model name mappings used by the resolver
    pub synonyms: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.80,
            tie_margin: 0.05,
            min_intent_confidence: 0.50,
            aggregation_vocabulary: AggregationVocabulary::default(),
            value_column_hints: ["amount", "value", "revenue", "sales", "total"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_date_table: "Date".to_string(),
            default_date_column: "Date".to_string(),
            synonyms: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Apply `TABULAR_*` overrides read through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let number = |key: &'static str| -> Result<Option<f64>, ConfigError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ConfigError::NotANumber { key, value: raw }),
                None => Ok(None),
            }
        };
        if let Some(v) = number("TABULAR_ACCEPT_THRESHOLD")? {
            self.accept_threshold = v;
        }
        if let Some(v) = number("TABULAR_TIE_MARGIN")? {
            self.tie_margin = v;
        }
        if let Some(v) = number("TABULAR_MIN_INTENT_CONFIDENCE")? {
            self.min_intent_confidence = v;
        }
        if let Some(table) = lookup("TABULAR_DATE_TABLE") {
            self.default_date_table = table;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("accept_threshold", self.accept_threshold),
            ("tie_margin", self.tie_margin),
            ("min_intent_confidence", self.min_intent_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { key, value });
            }
        }
        Ok(())
    }
}

/// Phrase -> aggregate function table. Phrases are matched as whole words;
/// the longest phrase present in a request wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationVocabulary(BTreeMap<String, AggregateFn>);

impl Default for AggregationVocabulary {
    fn default() -> Self {
        use AggregateFn::*;
        let entries = [
            ("total", Sum),
            ("sum", Sum),
            ("sum of", Sum),
            ("average", Average),
            ("avg", Average),
            ("mean", Average),
            ("count", Count),
            ("count of", Count),
            ("number of", Count),
            ("how many", Count),
            ("distinct count", DistinctCount),
            ("unique", DistinctCount),
            ("distinct", DistinctCount),
            ("min", Min),
            ("minimum", Min),
            ("lowest", Min),
            ("max", Max),
            ("maximum", Max),
            ("highest", Max),
        ];
        Self(
            entries
                .iter()
                .map(|(phrase, f)| (phrase.to_string(), *f))
                .collect(),
        )
    }
}

impl AggregationVocabulary {
    pub fn lookup(&self, phrase: &str) -> Option<AggregateFn> {
        self.0.get(&phrase.trim().to_lowercase()).copied()
    }

    pub fn insert(&mut self, phrase: impl Into<String>, function: AggregateFn) {
        self.0.insert(phrase.into().to_lowercase(), function);
    }

    /// Longest vocabulary phrase occurring as whole words in `text`, with its
    /// byte span. Ties on length go to the earliest occurrence.
    pub fn find_in(&self, text: &str) -> Option<(AggregateFn, std::ops::Range<usize>)> {
        let mut best: Option<(AggregateFn, std::ops::Range<usize>)> = None;
        for (phrase, function) in &self.0 {
            let Some(span) = find_phrase(text, phrase) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    span.len() > current.len()
                        || (span.len() == current.len() && span.start < current.start)
                }
            };
            if better {
                best = Some((*function, span));
            }
        }
        best
    }
}

lazy_static! {
    /// Whole-word patterns compiled once per distinct phrase.
    static ref PHRASE_PATTERNS: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
}

fn phrase_pattern(phrase: &str) -> Option<Regex> {
    let key = phrase.to_lowercase();
    let mut cache = PHRASE_PATTERNS.lock().ok()?;
    if let Some(re) = cache.get(&key) {
        return Some(re.clone());
    }
    let pattern = format!(r"(?i)(?:^|[^\w])({})(?:$|[^\w])", regex::escape(&key));
    let re = Regex::new(&pattern).ok()?;
    cache.insert(key, re.clone());
    Some(re)
}

/// First case-insensitive, whole-word occurrence of `phrase` in `text`.
pub fn find_phrase(text: &str, phrase: &str) -> Option<std::ops::Range<usize>> {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return None;
    }
    let re = phrase_pattern(phrase)?;
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.range())
}
