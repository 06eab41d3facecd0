//! Output salvage parser and per-stage shape normalizers.
//!
//! Models wrap JSON in code fences, prepend thinking blocks, or pad it with
//! prose. `salvage_json` tries an ordered list of pure extraction strategies
//! and returns `None` when all of them fail — it never errors, so callers
//! can apply their retry/fallback policy.
//!
//! The normalizers turn a salvaged `Value` into the typed shape a stage
//! expects, again returning `None` on any shape violation.

use crate::types::{Diagnosis, DiagnosisCandidate, DrugEntry, RecommendedDrug};
use serde_json::Value;

/// Extract a JSON document from model response text.
///
/// Strategies, each tried only when the previous fails:
/// 1. direct parse
/// 2. first `{` to last `}` span
/// 3. first `[` to last `]` span
/// 4. strip thinking blocks / code fences / outer blank lines, parse again
/// 5. object-span extraction on the cleaned text
pub fn salvage_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Some(v) = parse_container(trimmed) {
        return Some(v);
    }
    if let Some(v) = extract_span(trimmed, '{', '}') {
        return Some(v);
    }
    if let Some(v) = extract_span(trimmed, '[', ']') {
        return Some(v);
    }

    let cleaned = strip_wrapping(trimmed);
    if let Some(v) = parse_container(&cleaned) {
        return Some(v);
    }
    extract_span(&cleaned, '{', '}')
}

/// Parse and accept only objects or arrays; bare scalars are never a stage
/// output shape.
fn parse_container(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(v) if v.is_object() || v.is_array() => Some(v),
        _ => None,
    }
}

fn extract_span(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start >= end {
        return None;
    }
    parse_container(&text[start..=end])
}

/// Remove known non-content wrapping: `<think>…</think>` blocks, markdown
/// code fences, and leading/trailing blank lines.
fn strip_wrapping(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.replace("```json", "").replace("```", "").trim().to_string()
}

fn non_empty_string(v: &Value) -> Option<String> {
    let s = v.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn string_list(v: &Value) -> Option<Vec<String>> {
    let items = v.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(non_empty_string(item)?);
    }
    Some(out)
}

/// Clamp a raw model score to the 0–5 integer grading scale.
pub fn clamp_score(raw: f64) -> u8 {
    raw.round().clamp(0.0, 5.0) as u8
}

// ---------------------------------------------------------------------------
// Stage output shapes
// ---------------------------------------------------------------------------

/// Normalized symptom text plus retrieval keywords.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub optimized_symptoms: String,
    pub rag_keywords: Vec<String>,
}

pub fn normalize_preprocess(v: &Value) -> Option<Preprocessed> {
    let optimized_symptoms = non_empty_string(v.get("optimized_symptoms")?)?;
    let rag_keywords = string_list(v.get("rag_keywords")?)?;
    if rag_keywords.is_empty() {
        return None;
    }
    Some(Preprocessed {
        optimized_symptoms,
        rag_keywords,
    })
}

/// Quality grade for normalized symptoms.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticGrade {
    pub score: u8,
    pub comment: String,
    pub is_valid: bool,
}

pub fn normalize_critic(v: &Value) -> Option<CriticGrade> {
    let score = clamp_score(v.get("score")?.as_f64()?);
    let comment = v
        .get("comment")
        .and_then(non_empty_string)
        .unwrap_or_default();
    let is_valid = v
        .get("isValid")
        .and_then(Value::as_bool)
        .unwrap_or(score >= 3);
    Some(CriticGrade {
        score,
        comment,
        is_valid,
    })
}

/// Relevance or evidence grade: a 0–5 score plus rationale.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreGrade {
    pub score: u8,
    pub comment: String,
}

/// Fully-valid grade: numeric score and a non-empty rationale.
/// A score without rationale is only recoverable via `extract_score`.
fn normalize_grade(v: &Value, score_key: &str, comment_key: &str) -> Option<ScoreGrade> {
    let score = clamp_score(v.get(score_key)?.as_f64()?);
    let comment = non_empty_string(v.get(comment_key)?)?;
    Some(ScoreGrade { score, comment })
}

/// Best-effort grade: keeps the score the model produced even when the
/// rationale is missing, so a total validation failure can still prefer the
/// model's own number over a hard-coded neutral default.
pub fn extract_score(v: &Value, score_key: &str, comment_key: &str) -> Option<ScoreGrade> {
    let score = clamp_score(v.get(score_key)?.as_f64()?);
    let comment = v
        .get(comment_key)
        .and_then(non_empty_string)
        .unwrap_or_default();
    Some(ScoreGrade { score, comment })
}

pub fn normalize_relevance(v: &Value) -> Option<ScoreGrade> {
    normalize_grade(v, "ragScore", "ragComment")
}

pub fn normalize_evidence(v: &Value) -> Option<ScoreGrade> {
    normalize_grade(v, "diagnosisScore", "diagnosisComment")
}

/// Validate and reshape a diagnosis output.
///
/// Requires at least 3 complete candidates and at least 3 entries in each
/// guidance list. Probabilities are renormalized to sum to 1.0 and rounded
/// to two decimals; an all-zero distribution becomes uniform. Results are
/// truncated to 3, short tips to 10, and recommendations to 3 unless
/// `allow_extra` (the final formatting pass permits the drug-augmented
/// list).
pub fn normalize_diagnosis(v: &Value, allow_extra: bool) -> Option<Diagnosis> {
    let rows = v.get("results")?.as_array()?;
    let mut results: Vec<DiagnosisCandidate> = Vec::new();
    for row in rows {
        let (Some(condition), Some(probability), Some(description)) = (
            row.get("condition").and_then(non_empty_string),
            row.get("probability").and_then(Value::as_f64),
            row.get("description").and_then(non_empty_string),
        ) else {
            continue;
        };
        results.push(DiagnosisCandidate {
            condition,
            probability: probability.max(0.0),
            description,
        });
    }
    if results.len() < 3 {
        return None;
    }
    results.truncate(3);

    let total: f64 = results.iter().map(|r| r.probability).sum();
    let count = results.len();
    for r in &mut results {
        let p = if total > 0.0 {
            r.probability / total
        } else {
            1.0 / count as f64
        };
        r.probability = (p * 100.0).round() / 100.0;
    }

    let recommendations = collect_strings(v.get("recommendations"));
    let recomm_short = collect_strings(v.get("recomm_short"));
    if recommendations.len() < 3 || recomm_short.len() < 3 {
        return None;
    }

    let recommendations = if allow_extra {
        recommendations
    } else {
        recommendations.into_iter().take(3).collect()
    };
    let recomm_short = recomm_short.into_iter().take(10).collect();

    Some(Diagnosis {
        results,
        recommendations,
        recomm_short,
        review_comment: None,
    })
}

fn collect_strings(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| items.iter().filter_map(non_empty_string).collect())
        .unwrap_or_default()
}

/// Validate drug recommendation output: at least one condition carrying at
/// least one complete drug entry.
pub fn normalize_drugs(v: &Value) -> Option<Vec<DrugEntry>> {
    let rows = v.get("drugs")?.as_array()?;
    let mut entries: Vec<DrugEntry> = Vec::new();
    for row in rows {
        let Some(condition) = row.get("condition").and_then(non_empty_string) else {
            continue;
        };
        let Some(drug_rows) = row.get("recommended_drugs").and_then(Value::as_array) else {
            continue;
        };
        let drugs: Vec<RecommendedDrug> = drug_rows
            .iter()
            .filter_map(|d| {
                Some(RecommendedDrug {
                    name: d.get("name").and_then(non_empty_string)?,
                    usage: d.get("usage").and_then(non_empty_string)?,
                    notes: d.get("notes").and_then(non_empty_string)?,
                })
            })
            .collect();
        if !drugs.is_empty() {
            entries.push(DrugEntry {
                condition,
                recommended_drugs: drugs,
            });
        }
    }
    (!entries.is_empty()).then_some(entries)
}
