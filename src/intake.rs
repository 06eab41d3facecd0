//! Intake record — the immutable structured symptom description.
//!
//! Set once at entry and never mutated by any stage. Validation here is the
//! single strict checkpoint of the pipeline: a malformed intake is a caller
//! contract violation and raises a hard error instead of entering the
//! retry/fallback machinery.

use crate::config::AgentModelConfig;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity words indexed by `severity - 1`.
pub const SEVERITY_WORDS: [&str; 5] = ["轻微", "较轻", "中等", "较重", "严重"];

/// How long the symptoms have been present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationBucket {
    #[serde(rename = "lessThan24Hours")]
    LessThan24Hours,
    #[serde(rename = "1To3Days")]
    OneToThreeDays,
    #[serde(rename = "4To7Days")]
    FourToSevenDays,
    #[serde(rename = "1To2Weeks")]
    OneToTwoWeeks,
    #[serde(rename = "moreThan2Weeks")]
    MoreThanTwoWeeks,
}

impl DurationBucket {
    /// Human phrase used in prompts and deterministic fallbacks.
    pub fn phrase(&self) -> &'static str {
        match self {
            DurationBucket::LessThan24Hours => "24小时内",
            DurationBucket::OneToThreeDays => "1至3天",
            DurationBucket::FourToSevenDays => "4至7天",
            DurationBucket::OneToTwoWeeks => "1至2周",
            DurationBucket::MoreThanTwoWeeks => "超过2周",
        }
    }
}

/// Immutable input of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub body_part: String,
    /// Raw symptom identifiers (may be opaque ids).
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Display names for the symptoms; preferred over `symptoms` everywhere.
    #[serde(default)]
    pub symptom_names: Vec<String>,
    #[serde(default)]
    pub other_symptoms: Option<String>,
    /// 1 (mild) to 5 (severe).
    pub severity: u8,
    pub duration: DurationBucket,
    /// Model profile selecting per-stage model configuration.
    #[serde(default)]
    pub model_profile_id: Option<String>,
    /// Intake-level default model type ("local" or "remote").
    #[serde(default)]
    pub model_type: Option<String>,
    /// Per-stage model overrides, keyed by agent name. Highest precedence.
    #[serde(default)]
    pub agent_overrides: HashMap<String, AgentModelConfig>,
    /// Corpus tag filter for diagnosis retrieval.
    #[serde(default)]
    pub rag_corpus: Option<String>,
    /// Corpus tag filter for drug retrieval.
    #[serde(default)]
    pub drug_rag_corpus: Option<String>,
    /// Pre-confirmed normalization result; when both are present the
    /// normalize stage short-circuits without a model call.
    #[serde(default, rename = "_confirmed_optimized_symptoms")]
    pub confirmed_optimized_symptoms: Option<String>,
    #[serde(default, rename = "_confirmed_rag_keywords")]
    pub confirmed_rag_keywords: Option<Vec<String>>,
}

impl IntakeRecord {
    /// Strict shape validation — the only hard-error checkpoint.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.body_part.trim().is_empty() {
            return Err(PipelineError::InvalidIntake(
                "body_part must not be empty".to_string(),
            ));
        }
        if !(1..=5).contains(&self.severity) {
            return Err(PipelineError::InvalidIntake(format!(
                "severity must be 1..=5, got {}",
                self.severity
            )));
        }
        let has_symptoms = !self.display_symptoms().is_empty()
            || self
                .other_symptoms
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty());
        if !has_symptoms {
            return Err(PipelineError::InvalidIntake(
                "at least one symptom (symptom_names, symptoms or other_symptoms) is required"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Symptom display names, falling back to raw identifiers.
    pub fn display_symptoms(&self) -> &[String] {
        if !self.symptom_names.is_empty() {
            &self.symptom_names
        } else {
            &self.symptoms
        }
    }

    /// Severity as a human word, clamped to the table.
    pub fn severity_word(&self) -> &'static str {
        let idx = (self.severity.max(1).min(5) - 1) as usize;
        SEVERITY_WORDS[idx]
    }

    /// Caller-confirmed normalization, when both halves are present.
    pub fn confirmed(&self) -> Option<(String, Vec<String>)> {
        match (
            &self.confirmed_optimized_symptoms,
            &self.confirmed_rag_keywords,
        ) {
            (Some(sym), Some(kw)) if !sym.trim().is_empty() && !kw.is_empty() => {
                Some((sym.clone(), kw.clone()))
            }
            _ => None,
        }
    }
}
