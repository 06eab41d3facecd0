//! Deterministic, model-free substitute outputs.
//!
//! Every fallback here is a pure function of the intake record (or of
//! nothing), so two executions with the same input and zero successful
//! model responses produce byte-identical structures.

use crate::intake::IntakeRecord;
use crate::parse::Preprocessed;
use crate::types::{Diagnosis, DiagnosisCandidate, Document, DrugEntry, RecommendedDrug};

/// Fixed low-confidence diagnosis used when generation is skipped or
/// exhausts its retries, and when the final output fails revalidation.
pub fn fallback_diagnosis() -> Diagnosis {
    Diagnosis {
        results: vec![
            DiagnosisCandidate {
                condition: "需要进一步检查".to_string(),
                probability: 0.5,
                description: "基于当前症状描述，建议进行专业医学检查以确定具体病因。".to_string(),
            },
            DiagnosisCandidate {
                condition: "一般性不适".to_string(),
                probability: 0.3,
                description: "可能是轻微的身体不适，建议观察症状变化。".to_string(),
            },
            DiagnosisCandidate {
                condition: "心理因素".to_string(),
                probability: 0.2,
                description: "部分症状可能与心理状态相关，建议保持良好心态。".to_string(),
            },
        ],
        recommendations: vec![
            "建议尽快前往正规医院进行详细检查".to_string(),
            "保持良好的作息和饮食习惯".to_string(),
            "如症状加重请立即就医".to_string(),
        ],
        recomm_short: vec![
            "及时就医",
            "保持休息",
            "健康饮食",
            "多喝水",
            "避免劳累",
            "保持心情",
            "定期复查",
            "遵医嘱",
            "适当运动",
            "规律作息",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        review_comment: None,
    }
}

/// Normalization fallback assembled purely from structured intake fields:
/// body part, symptom names, severity word and duration phrase.
pub fn fallback_preprocess(intake: &IntakeRecord) -> Preprocessed {
    let symptoms = intake.display_symptoms();
    let joined = symptoms.join("、");
    let other = intake.other_symptoms.as_deref().unwrap_or("").trim();
    let body_part = if intake.body_part.trim().is_empty() {
        "全身"
    } else {
        intake.body_part.trim()
    };
    let severity = intake.severity_word();
    let duration = intake.duration.phrase();

    let combined = [joined.as_str(), other]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("，");
    let described = if combined.is_empty() {
        "不适症状"
    } else {
        &combined
    };

    let mut keywords: Vec<String> = Vec::new();
    keywords.push(body_part.to_string());
    keywords.extend(symptoms.iter().cloned());
    keywords.extend(split_free_text(other));
    keywords.push(severity.to_string());
    keywords.push(duration.to_string());
    keywords.retain(|k| !k.is_empty());

    Preprocessed {
        optimized_symptoms: format!(
            "患者{body_part}部位出现{described}，症状程度{severity}，持续时间{duration}。"
        ),
        rag_keywords: keywords,
    }
}

/// Keyword list used when the quality refine loop exhausts without passing.
pub fn fallback_keywords(intake: &IntakeRecord) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let body_part = intake.body_part.trim();
    if !body_part.is_empty() {
        keywords.push(body_part.to_string());
    }
    keywords.extend(intake.display_symptoms().iter().cloned());
    if let Some(other) = intake.other_symptoms.as_deref() {
        keywords.extend(
            other
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(String::from),
        );
    }
    keywords
}

/// Split free-text symptoms on common Chinese and ASCII separators,
/// dropping single-character fragments.
fn split_free_text(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c == '，' || c == '、' || c.is_whitespace())
        .filter(|t| t.chars().count() > 1)
        .map(String::from)
        .collect()
}

/// Synthetic document substituted when retrieval is unconfigured, disabled,
/// or erroring.
pub fn mock_document(optimized_symptoms: &str) -> Document {
    Document {
        doc_id: "mock-symptom-context".to_string(),
        score: 0.6,
        snippet: format!(
            "患者症状：{optimized_symptoms}。该类症状在临床中较为常见，需结合患者年龄、病史及体征综合判断，建议进一步检查以明确诊断。"
        ),
    }
}

/// Per-condition drug guidance used when drug recommendation retries
/// exhaust for one candidate.
pub fn fallback_drug_entry(condition: &str) -> DrugEntry {
    DrugEntry {
        condition: condition.to_string(),
        recommended_drugs: vec![RecommendedDrug {
            name: "请咨询医生".to_string(),
            usage: "根据具体情况用药".to_string(),
            notes: "需专业医生指导".to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intake() -> IntakeRecord {
        serde_json::from_value(json!({
            "body_part": "head",
            "symptom_names": ["headache", "fever"],
            "other_symptoms": "乏力, 出汗",
            "severity": 3,
            "duration": "1To3Days"
        }))
        .unwrap()
    }

    #[test]
    fn preprocess_fallback_is_deterministic() {
        let a = fallback_preprocess(&intake());
        let b = fallback_preprocess(&intake());
        assert_eq!(a, b);
        assert!(a.optimized_symptoms.contains("head"));
        assert!(a.optimized_symptoms.contains("中等"));
        assert!(a.optimized_symptoms.contains("1至3天"));
    }

    #[test]
    fn preprocess_fallback_keyword_contents() {
        let p = fallback_preprocess(&intake());
        assert_eq!(p.rag_keywords[0], "head");
        assert!(p.rag_keywords.contains(&"headache".to_string()));
        assert!(p.rag_keywords.contains(&"乏力".to_string()));
        assert!(p.rag_keywords.contains(&"出汗".to_string()));
        assert!(p.rag_keywords.contains(&"中等".to_string()));
        assert!(p.rag_keywords.contains(&"1至3天".to_string()));
    }

    #[test]
    fn preprocess_fallback_without_symptom_text() {
        let mut record = intake();
        record.symptom_names.clear();
        record.other_symptoms = None;
        let p = fallback_preprocess(&record);
        assert!(p.optimized_symptoms.contains("不适症状"));
    }

    #[test]
    fn diagnosis_fallback_shape_holds_invariants() {
        let d = fallback_diagnosis();
        assert_eq!(d.results.len(), 3);
        let sum: f64 = d.results.iter().map(|r| r.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(d.recommendations.len() >= 3);
        assert!(d.recomm_short.len() >= 3 && d.recomm_short.len() <= 10);
        assert_eq!(d, fallback_diagnosis());
    }

    #[test]
    fn mock_document_references_symptoms() {
        let doc = mock_document("患者头部胀痛");
        assert_eq!(doc.doc_id, "mock-symptom-context");
        assert!(doc.snippet.contains("患者头部胀痛"));
    }
}
