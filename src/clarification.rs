//! Clarification channel
//!
//! Low-confidence classification and ambiguous resolution never become hard
//! failures; they come back as a structured question with the candidates the
//! engine considered, for the conversational surface to render.

use crate::error::{AmbiguityError, AmbiguityReason};
use crate::intent::{Classification, IntentKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    /// Which intent the request has
    Intent,
    /// Which catalog object a phrase refers to
    Entity,
    /// Something the request needs was not said
    MissingInformation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClarificationOption {
    pub id: String,
    pub label: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClarificationRequest {
    pub kind: ClarificationKind,
    pub question: String,
    pub original_text: String,
    pub options: Vec<ClarificationOption>,
}

impl ClarificationRequest {
    pub fn from_ambiguity(error: &AmbiguityError, original_text: &str) -> Self {
        let question = match error.reason {
            AmbiguityReason::Tied => format!("Which {} did you mean by '{}'?", error.role, error.text),
            AmbiguityReason::BelowThreshold => format!(
                "Nothing in the model closely matches '{}'. Did you mean one of these?",
                error.text
            ),
            AmbiguityReason::NoMatch => format!(
                "Nothing in the model matches '{}'. Which {} should be used?",
                error.text, error.role
            ),
        };
        let options = error
            .candidates
            .iter()
            .map(|c| ClarificationOption {
                id: c.entity.to_string(),
                label: c.entity.to_string(),
                description: format!("similarity {:.2}", c.score),
                score: c.score,
            })
            .collect();
        Self {
            kind: ClarificationKind::Entity,
            question,
            original_text: original_text.to_string(),
            options,
        }
    }

    /// The classifier was not sure enough; offer the intents it considered.
    pub fn low_confidence(classification: &Classification) -> Self {
        let mut options = vec![intent_option(classification.kind(), classification.confidence)];
        for alt in &classification.alternatives {
            if !options.iter().any(|o| o.id == alt.kind.to_string()) {
                options.push(intent_option(alt.kind, alt.score));
            }
        }
        Self {
            kind: ClarificationKind::Intent,
            question: "What would you like to do with this request?".to_string(),
            original_text: classification.text.clone(),
            options,
        }
    }

    pub fn missing(what: &str, original_text: &str) -> Self {
        Self {
            kind: ClarificationKind::MissingInformation,
            question: format!("The request does not say {}. Could you add it?", what),
            original_text: original_text.to_string(),
            options: Vec::new(),
        }
    }
}

fn intent_option(kind: IntentKind, score: f64) -> ClarificationOption {
    let description = match kind {
        IntentKind::ConnectionManagement => "connect to, refresh or disconnect from a model",
        IntentKind::ModelMutation => "change tables, columns, relationships or roles",
        IntentKind::CreateMeasure => "define a reusable measure",
        IntentKind::TimeIntelligenceQuery => "compare a value across time periods",
        IntentKind::Query => "retrieve a value from the model",
        IntentKind::ExploreSchema => "look at what the model contains",
        IntentKind::Troubleshooting => "diagnose a problem with the model",
    };
    ClarificationOption {
        id: kind.to_string(),
        label: kind.to_string(),
        description: description.to_string(),
        score,
    }
}
