//! Slot extraction
//!
//! Pattern-based extraction of slot values from request text. Each extractor
//! consumes the spans it recognises (blanking them out) so that later passes
//! only see what is left; the subject is whatever meaningful run of words
//! remains at the end.

use super::*;
use crate::catalog::SchemaCatalog;
use crate::config::{find_phrase, AggregationVocabulary};
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

const NAME: &str = r#"('[^']+'|"[^"]+"|\[[^\]]+\]|[A-Za-z_]\w*)"#;
const MULTI_NAME: &str = r#"('[^']+'|"[^"]+"|\[[^\]]+\]|[A-Za-z_][\w ]*?)"#;
const ENDPOINT: &str = r#"((?:'[^']+'|[A-Za-z_]\w*)(?:\[[^\]]+\]|\.[A-Za-z_]\w*)?)"#;

lazy_static! {
    static ref EXPLICIT_COLUMN: Regex =
        Regex::new(r"(?:'([^']+)'|\b([A-Za-z_]\w*))\[([^\]]+)\]").expect("valid regex");
    static ref BRACKETED: Regex = Regex::new(r"\[([^\]]+)\]").expect("valid regex");

    static ref GROWTH_YEAR: Regex =
        Regex::new(r"(?i)\b(yoy|y/y|year[\s-]+over[\s-]+year|annual\s+growth|yearly\s+growth)\b").expect("valid regex");
    static ref GROWTH_QUARTER: Regex =
        Regex::new(r"(?i)\b(qoq|q/q|quarter[\s-]+over[\s-]+quarter|quarterly\s+growth)\b").expect("valid regex");
    static ref GROWTH_MONTH: Regex =
        Regex::new(r"(?i)\b(mom|m/m|month[\s-]+over[\s-]+month|monthly\s+growth)\b").expect("valid regex");
    static ref PRIOR_PERIOD: Regex =
        Regex::new(r"(?i)\b(?:same\s+period\s+)?(?:previous|prior|last)\s+(year|quarter|month)(?:'s)?").expect("valid regex");
    static ref GROWTH_WORD: Regex = Regex::new(r"(?i)\b(growth|change|increase)\b").expect("valid regex");
    static ref GROWTH_ONLY: Regex = Regex::new(r"(?i)\bgrowth\b").expect("valid regex");

    static ref SYMBOLIC_FILTER: Regex = Regex::new(
        r#"(?i)(?:\b(?:where|whose|with|for|and|when)\s+)?\b([A-Za-z_]\w*(?:\s+[A-Za-z_]\w*)?)\s*(<>|!=|>=|<=|==|=|<|>)\s*('[^']*'|"[^"]*"|[^\s,]+)"#
    ).expect("valid regex");
    static ref WORD_FILTER: Regex = Regex::new(
        r#"(?i)\b(?:where|whose|and)\s+([A-Za-z_]\w*(?:\s+[A-Za-z_]\w*)?)\s+(is\s+not|is|equals)\s+('[^']*'|"[^"]*"|[\w-]+)"#
    ).expect("valid regex");

    static ref TABLE_HINT: Regex = Regex::new(
        r#"(?i)\b(?:in|from|of|on|for)\s+(?:the\s+)?('[^']+'|"[^"]+"|[A-Za-z_]\w*)\s+table\b"#
    ).expect("valid regex");
    static ref TRAILING_TARGET: Regex = Regex::new(
        r#"(?i)\b(?:in|of|for|from|on)\s+(?:the\s+)?('[^']+'|"[^"]+"|[A-Za-z_]\w*)\s*[?.!]?\s*$"#
    ).expect("valid regex");
    static ref DESCRIBE_TARGET: Regex = Regex::new(
        r#"(?i)\b(?:describe|inspect)\s+(?:the\s+)?('[^']+'|"[^"]+"|[A-Za-z_]\w*)"#
    ).expect("valid regex");

    static ref CALLED: Regex = Regex::new(
        r#"(?i)\b(?:called|named)\s+('[^']+'|"[^"]+"|\[[^\]]+\]|[\w ]+?)(?:\s+(?:for|as|that|which|using|with|showing|to)\b|\s*[?.!]?\s*$)"#
    ).expect("valid regex");
    static ref REDEFINE: Regex = Regex::new(&format!(
        r"(?i)\b(?:redefine|change|update|modify)\s+(?:the\s+)?measure\s+{}\s+(?:as|to|so\s+it\s+is)\s+(.+)$",
        MULTI_NAME
    )).expect("valid regex");

    static ref MUTATION_VERB: Regex = Regex::new(
        r"(?i)\b(rename|add|create|new|remove|delete|drop|deactivate|disable|activate|enable)\b"
    ).expect("valid regex");
    static ref MODEL_NOUN: Regex =
        Regex::new(r"(?i)\b(tables?|columns?|measures?|relationships?|roles?)\b").expect("valid regex");

    static ref ADD_TABLE: Regex = Regex::new(&format!(
        r"(?i)\btable\s+(?:called\s+|named\s+)?{}(?:\s+with\s+columns?\s+(.+))?",
        NAME
    )).expect("valid regex");
    static ref ADD_NAMED_TABLE: Regex = Regex::new(&format!(
        r"(?i)\b(?:add|create)\s+(?:an?\s+)?(?:new\s+)?{}\s+table(?:\s+with\s+columns?\s+(.+))?",
        NAME
    )).expect("valid regex");
    static ref RENAME_TABLE: Regex = Regex::new(&format!(
        r"(?i)\brename\s+(?:the\s+)?(?:table\s+{0}|{0}\s+table)\s+to\s+{0}",
        NAME
    )).expect("valid regex");
    static ref REMOVE_TABLE: Regex = Regex::new(&format!(
        r"(?i)\b(?:remove|delete|drop)\s+(?:the\s+)?(?:table\s+{0}|{0}\s+table)",
        NAME
    )).expect("valid regex");
    static ref COLUMN_SPEC: Regex = Regex::new(&format!(
        r"(?i)^\s*{}(?:\s*(?:\(|:|\s+as\s+|\s+)\s*([A-Za-z][\w ]*?)\)?)?\s*$",
        NAME
    )).expect("valid regex");

    static ref COLUMN_TARGET: Regex = Regex::new(&format!(
        r"(?i)\bcolumns?\s+(?:called\s+|named\s+)?(?:{}|{}(?:\s+(?:in|of|on|from)\s+(?:the\s+)?{}(?:\s+table)?)?)",
        r"(?:'([^']+)'|([A-Za-z_]\w*))\[([^\]]+)\]",
        NAME,
        NAME
    )).expect("valid regex");
    static ref PARENT_TABLE: Regex = Regex::new(&format!(
        r"(?i)\b(?:to|into|in|on)\s+(?:the\s+)?{}(?:\s+table)?",
        NAME
    )).expect("valid regex");
    static ref RENAME_TO: Regex = Regex::new(&format!(r"(?i)\s+to\s+{}\s*[?.!]?\s*$", MULTI_NAME)).expect("valid regex");
    static ref KIND_WORD: Regex = Regex::new(
        r"(?i)\b(numeric|number|decimal|integer|int|whole\s+number|currency|double|text|string|date|datetime|boolean|bool)\b"
    ).expect("valid regex");

    static ref MEASURE_TARGET: Regex = Regex::new(&format!(
        r"(?i)\bmeasure\s+{}(?:\s+(?:in|on|from|of)\s+(?:the\s+)?{}\s+table)?(?:\s+to\s+|\s*[?.!]?\s*$)",
        MULTI_NAME, NAME
    )).expect("valid regex");

    static ref RELATIONSHIP_ENDS: Regex = Regex::new(&format!(
        r"(?i)\brelationships?\s+(?:from|between)\s+{}\s+(?:to|and|with)\s+{}",
        ENDPOINT, ENDPOINT
    )).expect("valid regex");
    static ref CARDINALITY: Regex =
        Regex::new(r"(?i)\b(many|one)[\s-]+to[\s-]+(many|one)\b").expect("valid regex");
    static ref BOTH_DIRECTIONS: Regex = Regex::new(
        r"(?i)\b(both\s+directions|both\s+ways|bidirectional|bi-directional|cross[\s-]filter(?:ing)?\s+both)\b"
    ).expect("valid regex");
    static ref SINGLE_DIRECTION: Regex =
        Regex::new(r"(?i)\b(single\s+direction|one\s+direction|single[\s-]direction(?:al)?)\b").expect("valid regex");
    static ref LIST_SEPARATOR: Regex = Regex::new(r"(?i)\s*,\s*|\s+and\s+").expect("valid regex");
    static ref INACTIVE: Regex = Regex::new(r"(?i)\binactive\b").expect("valid regex");

    static ref ROLE_TARGET: Regex = Regex::new(&format!(
        r"(?i)\brole\s+(?:called\s+|named\s+)?{}(?:\s+with\s+.*|\s+to\s+.*|\s*[?.!]?\s*$)",
        MULTI_NAME
    )).expect("valid regex");
    static ref NAMED_ROLE: Regex = Regex::new(&format!(
        r"(?i)\b(?:remove|delete|drop|rename)\s+(?:the\s+)?{}\s+role\b",
        MULTI_NAME
    )).expect("valid regex");

    static ref CONNECT_TARGET: Regex =
        Regex::new(r"(?i)\bconnect\s+(?:to\s+)?(.+?)\s*[?.!]?\s*$").expect("valid regex");
    static ref TROUBLE_WORD: Regex = Regex::new(
        r"(?i)\b(error|errors|fail|failed|failing|broken|wrong|not\s+working|doesn't\s+work|issue|problem|slow|blank|missing)\b"
    ).expect("valid regex");
}

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "are", "as", "build", "by", "calculate", "can", "compute", "could",
    "create", "define", "display", "each", "for", "from", "get", "give", "i", "in", "is", "list",
    "make", "me", "measure", "my", "need", "new", "of", "our", "per", "please", "show", "tell",
    "the", "to", "us", "value", "values", "want", "was", "were", "what", "what's", "whats",
    "would", "you", "add",
];

/// Strip the quoting forms accepted around names: `'x'`, `"x"`, `[x]`.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    for (open, close) in [('\'', '\''), ('"', '"'), ('[', ']')] {
        if s.len() >= 2 && s.starts_with(open) && s.ends_with(close) {
            return s[1..s.len() - 1].trim().to_string();
        }
    }
    s.to_string()
}

/// Replace a consumed span with spaces, keeping byte offsets stable.
fn blank(work: &mut String, span: Range<usize>) {
    let filler = " ".repeat(span.len());
    work.replace_range(span, &filler);
}

fn group(caps: &regex::Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).map(|m| unquote(m.as_str())).filter(|s| !s.is_empty())
}

pub fn extract_query(
    text: &str,
    catalog: Option<&SchemaCatalog>,
    vocab: &AggregationVocabulary,
) -> QuerySlots {
    let mut work = text.to_string();
    extract_query_from(&mut work, catalog, vocab)
}

fn extract_query_from(
    work: &mut String,
    catalog: Option<&SchemaCatalog>,
    vocab: &AggregationVocabulary,
) -> QuerySlots {
    let mut slots = QuerySlots::default();

    let explicit = EXPLICIT_COLUMN.captures(work.as_str()).map(|caps| {
        (
            group(&caps, 1).or_else(|| group(&caps, 2)),
            caps[3].trim().to_string(),
            caps.get(0).map_or(0..0, |m| m.range()),
        )
    });
    if let Some((table, column, span)) = explicit {
        slots.subject = Some(Slot::new(column, 1.0));
        slots.table_hint = table.map(|t| Slot::new(t, 1.0));
        slots.explicit = true;
        blank(work, span);
    } else if let Some((name, span)) = BRACKETED
        .captures(work.as_str())
        .map(|caps| (caps[1].trim().to_string(), caps.get(0).map_or(0..0, |m| m.range())))
    {
        slots.subject = Some(Slot::new(name, 1.0));
        blank(work, span);
    }

    if slots.subject.is_none() {
        if let Some((name, span)) = catalog.and_then(|c| measure_mention(work.as_str(), c)) {
            slots.subject = Some(Slot::new(name, 1.0));
            blank(work, span);
        }
    }

    slots.time_window = extract_time_window(work);
    slots.filters = extract_filters(work);

    if slots.table_hint.is_none() {
        let hint = TABLE_HINT
            .captures(work.as_str())
            .and_then(|caps| Some((group(&caps, 1)?, caps.get(0)?.range())));
        if let Some((table, span)) = hint {
            slots.table_hint = Some(Slot::new(table, 0.9));
            blank(work, span);
        }
    }

    if let Some((function, span)) = vocab.find_in(work.as_str()) {
        slots.aggregation = Some(AggregationSlot {
            text: work[span.clone()].to_string(),
            function,
        });
        blank(work, span);
    }

    if slots.subject.is_none() {
        slots.subject = leftover_subject(work.as_str()).map(|s| Slot::new(s, 0.9));
    }
    slots
}

/// Longest measure name (or alias) mentioned verbatim in the text.
fn measure_mention(text: &str, catalog: &SchemaCatalog) -> Option<(String, Range<usize>)> {
    let mut best: Option<(String, Range<usize>)> = None;
    for measure in catalog.measures() {
        for name in std::iter::once(&measure.name).chain(measure.aliases.iter()) {
            if let Some(span) = find_phrase(text, name) {
                if best.as_ref().map_or(true, |(_, b)| span.len() > b.len()) {
                    best = Some((name.clone(), span));
                }
            }
        }
    }
    best
}

fn extract_time_window(work: &mut String) -> Option<TimeWindow> {
    let explicit_growth = [
        (&*GROWTH_YEAR, TimeGranularity::Year),
        (&*GROWTH_QUARTER, TimeGranularity::Quarter),
        (&*GROWTH_MONTH, TimeGranularity::Month),
    ]
    .into_iter()
    .find_map(|(re, granularity)| re.find(work.as_str()).map(|m| (granularity, m.range())));

    let (granularity, comparison, span) = if let Some((granularity, span)) = explicit_growth {
        (granularity, TimeComparison::Growth, span)
    } else if let Some(caps) = PRIOR_PERIOD.captures(work.as_str()) {
        let granularity = match caps[1].to_lowercase().as_str() {
            "quarter" => TimeGranularity::Quarter,
            "month" => TimeGranularity::Month,
            _ => TimeGranularity::Year,
        };
        let comparison = if GROWTH_WORD.is_match(work.as_str()) {
            TimeComparison::Growth
        } else {
            TimeComparison::PriorPeriod
        };
        (granularity, comparison, caps.get(0)?.range())
    } else {
        let m = GROWTH_ONLY.find(work.as_str())?;
        (TimeGranularity::Year, TimeComparison::Growth, m.range())
    };

    let mut text = work[span.clone()].trim().to_string();
    blank(work, span);
    if comparison == TimeComparison::Growth {
        if let Some(m) = GROWTH_WORD.find(work.as_str()) {
            let range = m.range();
            text = format!("{} {}", text, &work[range.clone()]);
            blank(work, range);
        }
    }
    Some(TimeWindow {
        granularity,
        comparison,
        text,
    })
}

fn extract_filters(work: &mut String) -> Vec<FilterSlot> {
    let mut found: Vec<(Range<usize>, FilterSlot)> = Vec::new();
    for caps in SYMBOLIC_FILTER.captures_iter(work.as_str()) {
        let (Some(whole), Some(column), Some(op)) =
            (caps.get(0), group(&caps, 1), ComparisonOp::parse(&caps[2]))
        else {
            continue;
        };
        found.push((
            whole.range(),
            FilterSlot {
                column: Slot::new(column, 0.9),
                op,
                value: unquote(&caps[3]),
            },
        ));
    }
    for caps in WORD_FILTER.captures_iter(work.as_str()) {
        let Some(whole) = caps.get(0) else { continue };
        if found.iter().any(|(r, _)| r.start < whole.end() && whole.start() < r.end) {
            continue;
        }
        let verb = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
        let (Some(column), Some(op)) = (group(&caps, 1), ComparisonOp::parse(&verb)) else {
            continue;
        };
        found.push((
            whole.range(),
            FilterSlot {
                column: Slot::new(column, 0.8),
                op,
                value: unquote(&caps[3]),
            },
        ));
    }
    found.sort_by_key(|(r, _)| r.start);
    for (span, _) in &found {
        blank(work, span.clone());
    }
    found.into_iter().map(|(_, f)| f).collect()
}

/// First run of non-stopword tokens left in the text.
fn leftover_subject(work: &str) -> Option<String> {
    let mut run: Vec<String> = Vec::new();
    for token in work.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '\'');
        let token = token.trim_matches('\'');
        if token.is_empty() {
            if !run.is_empty() {
                break;
            }
            continue;
        }
        if STOPWORDS.contains(&token.to_lowercase().as_str()) {
            if !run.is_empty() {
                break;
            }
            continue;
        }
        run.push(token.to_string());
    }
    (!run.is_empty()).then(|| run.join(" "))
}

pub fn extract_measure(
    text: &str,
    catalog: Option<&SchemaCatalog>,
    vocab: &AggregationVocabulary,
) -> MeasureSlots {
    if let Some(caps) = REDEFINE.captures(text) {
        if let (Some(name), Some(body)) = (group(&caps, 1), caps.get(2)) {
            let query = extract_query(body.as_str(), catalog, vocab);
            return MeasureSlots {
                query,
                measure_name: Some(Slot::new(name, 0.95)),
                redefine: true,
            };
        }
    }

    let mut work = text.to_string();
    let mut measure_name = None;
    let called = CALLED
        .captures(&work)
        .and_then(|caps| Some((group(&caps, 1)?, caps.get(1)?.range(), caps.get(0)?.start())));
    if let Some((name, span, start)) = called {
        measure_name = Some(Slot::new(name, 0.95));
        blank(&mut work, start..span.end);
    }
    let query = extract_query_from(&mut work, catalog, vocab);
    MeasureSlots {
        query,
        measure_name,
        redefine: false,
    }
}

pub fn extract_explore(text: &str) -> ExploreSlots {
    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| find_phrase(&lower, w).is_some());
    let scope = if has(&["columns", "column", "fields", "field"]) {
        ExploreScope::Columns
    } else if has(&["measures", "measure"]) {
        ExploreScope::Measures
    } else if has(&["relationships", "relationship", "joins"]) {
        ExploreScope::Relationships
    } else if has(&["roles", "role", "security"]) {
        ExploreScope::Roles
    } else if DESCRIBE_TARGET.is_match(text) && !has(&["tables", "schema", "model"]) {
        ExploreScope::Columns
    } else {
        ExploreScope::Tables
    };

    let target = [&*TABLE_HINT, &*TRAILING_TARGET, &*DESCRIBE_TARGET]
        .into_iter()
        .find_map(|re| re.captures(text).and_then(|caps| group(&caps, 1)))
        .filter(|t| {
            !matches!(
                t.to_lowercase().as_str(),
                "model" | "schema" | "tables" | "columns" | "measures" | "relationships" | "roles"
                    | "it" | "this" | "that" | "database" | "dataset"
            )
        })
        .map(|t| Slot::new(t, 0.9));

    ExploreSlots {
        scope: if target.is_none() && scope == ExploreScope::Columns {
            ExploreScope::Tables
        } else {
            scope
        },
        target,
    }
}

pub fn extract_connection(text: &str) -> ConnectionSlots {
    let lower = text.to_lowercase();
    let action = if lower.contains("disconnect") || find_phrase(&lower, "close").is_some() {
        ConnectionAction::Disconnect
    } else if ["refresh", "reload", "resync", "reconnect"]
        .iter()
        .any(|w| find_phrase(&lower, w).is_some())
    {
        ConnectionAction::Refresh
    } else if ["status", "connected"].iter().any(|w| find_phrase(&lower, w).is_some()) {
        ConnectionAction::Status
    } else {
        ConnectionAction::Connect
    };
    let target = match action {
        ConnectionAction::Connect => CONNECT_TARGET
            .captures(text)
            .and_then(|caps| group(&caps, 1))
            .filter(|t| !matches!(t.to_lowercase().as_str(), "the model" | "model" | "it")),
        _ => None,
    };
    ConnectionSlots { action, target }
}

pub fn extract_troubleshooting(text: &str) -> TroubleshootingSlots {
    TroubleshootingSlots {
        text: text.to_string(),
        symptom: TROUBLE_WORD.find(text).map(|m| m.as_str().to_lowercase()),
    }
}

/// Mutation slots, or `None` when the text names no model object to change.
pub fn extract_mutation(text: &str) -> Option<MutationSlots> {
    let verb = MUTATION_VERB.find(text)?;
    let action = match verb.as_str().to_lowercase().as_str() {
        "rename" => MutationAction::Rename,
        "remove" | "delete" | "drop" => MutationAction::Remove,
        "activate" | "enable" => MutationAction::Activate,
        "deactivate" | "disable" => MutationAction::Deactivate,
        _ => MutationAction::Add,
    };
    let object = match MODEL_NOUN.find_at(text, verb.start()) {
        Some(noun) => match noun.as_str().to_lowercase().trim_end_matches('s') {
            "table" => ModelObject::Table,
            "column" => ModelObject::Column,
            "measure" => ModelObject::Measure,
            "relationship" => ModelObject::Relationship,
            _ => ModelObject::Role,
        },
        None if EXPLICIT_COLUMN.is_match(text) => ModelObject::Column,
        None => return None,
    };

    let mut slots = MutationSlots::new(action, object);
    match object {
        ModelObject::Table => table_slots(text, &mut slots),
        ModelObject::Column => column_slots(text, &mut slots),
        ModelObject::Measure => measure_slots(text, &mut slots),
        ModelObject::Relationship => relationship_slots(text, &mut slots),
        ModelObject::Role => role_slots(text, &mut slots),
    }
    Some(slots)
}

fn new_name(text: &str) -> Option<Slot> {
    RENAME_TO
        .captures(text)
        .and_then(|caps| group(&caps, 1))
        .map(|n| Slot::new(n, 0.95))
}

fn table_slots(text: &str, slots: &mut MutationSlots) {
    match slots.action {
        MutationAction::Add => {
            let caps = ADD_TABLE
                .captures(text)
                .filter(|c| group(c, 1).map_or(false, |n| !is_filler(&n)))
                .or_else(|| ADD_NAMED_TABLE.captures(text));
            if let Some(caps) = caps {
                slots.target = group(&caps, 1).map(|n| Slot::new(n, 0.9));
                if let Some(list) = caps.get(2) {
                    slots.columns = parse_column_specs(list.as_str());
                }
            }
        }
        MutationAction::Rename => {
            if let Some(caps) = RENAME_TABLE.captures(text) {
                slots.target = group(&caps, 1)
                    .or_else(|| group(&caps, 2))
                    .map(|n| Slot::new(n, 0.9));
                slots.new_name = group(&caps, 3).map(|n| Slot::new(n, 0.95));
            }
        }
        _ => {
            if let Some(caps) = REMOVE_TABLE.captures(text) {
                slots.target = group(&caps, 1)
                    .or_else(|| group(&caps, 2))
                    .map(|n| Slot::new(n, 0.9));
            }
        }
    }
}

fn is_filler(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "a" | "an" | "the" | "new" | "this" | "that" | "called" | "named" | "with" | "to" | "from" | "in"
    )
}

fn parse_column_specs(list: &str) -> Vec<ColumnSpecSlot> {
    LIST_SEPARATOR
        .split(list)
        .filter_map(|part| {
            let caps = COLUMN_SPEC.captures(part)?;
            let name = group(&caps, 1)?;
            let kind = caps
                .get(2)
                .and_then(|k| DataKind::parse(k.as_str()))
                .unwrap_or(DataKind::Text);
            Some(ColumnSpecSlot { name, kind })
        })
        .collect()
}

fn column_slots(text: &str, slots: &mut MutationSlots) {
    let explicit = EXPLICIT_COLUMN.captures(text).map(|caps| {
        (
            group(&caps, 1).or_else(|| group(&caps, 2)),
            caps[3].trim().to_string(),
        )
    });
    if let Some((table, column)) = explicit {
        slots.parent = table.map(|t| Slot::new(t, 1.0));
        slots.target = Some(Slot::new(column, 1.0));
    } else if let Some(caps) = COLUMN_TARGET.captures(text) {
        slots.target = group(&caps, 4).map(|c| Slot::new(c, 0.9));
        slots.parent = group(&caps, 5).map(|t| Slot::new(t, 0.9));
    }
    if slots.parent.is_none() && slots.action == MutationAction::Add {
        slots.parent = PARENT_TABLE
            .captures_iter(text)
            .filter_map(|caps| group(&caps, 1))
            .find(|t| !is_filler(t))
            .map(|t| Slot::new(t, 0.8));
    }
    match slots.action {
        MutationAction::Add => {
            slots.data_kind = Some(
                KIND_WORD
                    .find(text)
                    .and_then(|m| DataKind::parse(m.as_str()))
                    .unwrap_or(DataKind::Text),
            );
        }
        MutationAction::Rename => slots.new_name = new_name(text),
        _ => {}
    }
}

fn measure_slots(text: &str, slots: &mut MutationSlots) {
    if let Some(caps) = MEASURE_TARGET.captures(text) {
        slots.target = group(&caps, 1).map(|m| Slot::new(m, 0.9));
        if let Some(parent) = group(&caps, 2) {
            slots.parent = Some(Slot::new(parent, 0.9));
        }
    }
    if slots.action == MutationAction::Rename {
        slots.new_name = new_name(text);
    }
}

fn endpoint(raw: &str) -> EndpointSlot {
    let raw = raw.trim();
    if let Some(caps) = EXPLICIT_COLUMN.captures(raw) {
        let table = group(&caps, 1).or_else(|| group(&caps, 2)).unwrap_or_default();
        return EndpointSlot {
            table: Slot::new(table, 1.0),
            column: Some(Slot::new(caps[3].trim(), 1.0)),
        };
    }
    match raw.split_once('.') {
        Some((table, column)) => EndpointSlot {
            table: Slot::new(unquote(table), 0.95),
            column: Some(Slot::new(column.trim(), 0.95)),
        },
        None => EndpointSlot {
            table: Slot::new(unquote(raw), 0.9),
            column: None,
        },
    }
}

fn relationship_slots(text: &str, slots: &mut MutationSlots) {
    if let Some(caps) = RELATIONSHIP_ENDS.captures(text) {
        slots.from = caps.get(1).map(|m| endpoint(m.as_str()));
        slots.to = caps.get(2).map(|m| endpoint(m.as_str()));
    }
    slots.cardinality = CARDINALITY.captures(text).map(|caps| {
        match (caps[1].to_lowercase().as_str(), caps[2].to_lowercase().as_str()) {
            ("one", "many") => Cardinality::OneToMany,
            ("one", "one") => Cardinality::OneToOne,
            ("many", "many") => Cardinality::ManyToMany,
            _ => Cardinality::ManyToOne,
        }
    });
    slots.cross_filter = if BOTH_DIRECTIONS.is_match(text) {
        Some(CrossFilterDirection::Both)
    } else if SINGLE_DIRECTION.is_match(text) {
        Some(CrossFilterDirection::Single)
    } else {
        None
    };
    slots.active = match slots.action {
        MutationAction::Add => Some(!INACTIVE.is_match(text)),
        MutationAction::Activate => Some(true),
        MutationAction::Deactivate => Some(false),
        _ => None,
    };
}

fn role_slots(text: &str, slots: &mut MutationSlots) {
    let target = ROLE_TARGET
        .captures(text)
        .and_then(|caps| group(&caps, 1))
        .filter(|n| !is_filler(n))
        .or_else(|| NAMED_ROLE.captures(text).and_then(|caps| group(&caps, 1)));
    slots.target = target.map(|n| Slot::new(n, 0.9));
    match slots.action {
        MutationAction::Rename => slots.new_name = new_name(text),
        MutationAction::Add => {
            let lower = text.to_lowercase();
            slots.permission = Some(if lower.contains("admin") {
                ModelPermission::Administrator
            } else if lower.contains("refresh") {
                ModelPermission::ReadRefresh
            } else {
                ModelPermission::Read
            });
        }
        _ => {}
    }
}
