//! Shared value types flowing through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One retrieved knowledge-base snippet.
///
/// Ephemeral: produced per request by the retrieval adapter, consumed by the
/// grading and generation stages, never persisted by the engine. The score
/// is whatever the similarity source reports and is not bounded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub score: f64,
    pub snippet: String,
}

/// One candidate condition in the differential diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisCandidate {
    pub condition: String,
    pub probability: f64,
    pub description: String,
}

/// Ranked differential diagnosis plus guidance lists.
///
/// Invariant once present in state: 3 candidates whose probabilities sum to
/// 1.0 (± rounding), at least 3 recommendations and 3 short tips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub results: Vec<DiagnosisCandidate>,
    pub recommendations: Vec<String>,
    pub recomm_short: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_comment: Option<String>,
}

/// Drug guidance for one diagnosed condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugEntry {
    pub condition: String,
    pub recommended_drugs: Vec<RecommendedDrug>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedDrug {
    pub name: String,
    pub usage: String,
    pub notes: String,
}

/// Which model a stage actually used, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub model_type: String,
    pub model: String,
}

impl ModelInfo {
    pub fn new(model_type: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            model: model.into(),
        }
    }
}

/// Terminal output of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub results: Vec<DiagnosisCandidate>,
    pub recommendations: Vec<String>,
    pub recomm_short: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_comment: Option<String>,
    /// Per-agent model info accumulated across stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_models: Option<HashMap<String, ModelInfo>>,
    /// The retrieval keywords that drove the knowledge-base search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_keywords: Option<Vec<String>>,
}

impl From<Diagnosis> for FinalOutput {
    fn from(d: Diagnosis) -> Self {
        Self {
            results: d.results,
            recommendations: d.recommendations,
            recomm_short: d.recomm_short,
            review_comment: d.review_comment,
            agent_models: None,
            rag_keywords: None,
        }
    }
}
