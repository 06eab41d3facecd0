//! Progress events emitted after each stage completes.
//!
//! Summaries are computed from the post-merge state, so an event always
//! reflects what downstream stages will actually see.

use crate::stages::StageId;
use crate::state::PipelineState;
use crate::types::ModelInfo;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: StageId,
    pub label: &'static str,
    /// 1-based position in the run.
    pub ordinal: usize,
    pub total: usize,
    pub summary: StageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSummary {
    Normalized {
        optimized_symptoms: String,
        rag_keywords: Vec<String>,
    },
    QualityChecked {
        keyword_count: usize,
    },
    Retrieved {
        doc_count: usize,
    },
    RelevanceGraded {
        rag_score: Option<u8>,
        rag_comment: String,
    },
    DiagnosisGenerated {
        conditions: Vec<ConditionProbability>,
    },
    EvidenceGraded {
        evidence_score: Option<u8>,
    },
    DrugsRecommended {
        recommendation_count: usize,
    },
    Reviewed {
        review_comment: Option<String>,
    },
    Formatted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionProbability {
    pub condition: String,
    pub probability: f64,
}

fn conditions(state: &PipelineState) -> Vec<ConditionProbability> {
    state
        .diagnosis
        .as_ref()
        .map(|d| {
            d.results
                .iter()
                .map(|r| ConditionProbability {
                    condition: r.condition.clone(),
                    probability: r.probability,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Summarize one completed stage from the merged state.
pub fn summarize(stage: StageId, state: &PipelineState) -> StageSummary {
    match stage {
        StageId::SymptomNormalizer => StageSummary::Normalized {
            optimized_symptoms: state.optimized_symptoms.clone(),
            rag_keywords: state.rag_keywords.clone(),
        },
        StageId::SymptomQualityGrader => StageSummary::QualityChecked {
            keyword_count: state.rag_keywords.len(),
        },
        StageId::RagRetriever => StageSummary::Retrieved {
            doc_count: state.rag_docs.len(),
        },
        StageId::RagRelevanceGrader => StageSummary::RelevanceGraded {
            rag_score: state.rag_score,
            rag_comment: state.rag_comment.clone(),
        },
        StageId::DiagnosisGenerator => StageSummary::DiagnosisGenerated {
            conditions: conditions(state),
        },
        StageId::DrugEvidenceGrader => StageSummary::EvidenceGraded {
            evidence_score: state.evidence_score,
        },
        StageId::DrugRecommender => StageSummary::DrugsRecommended {
            recommendation_count: state
                .diagnosis
                .as_ref()
                .map(|d| d.recommendations.len())
                .unwrap_or(0),
        },
        StageId::DiagnosisReviewer => StageSummary::Reviewed {
            review_comment: state
                .diagnosis
                .as_ref()
                .and_then(|d| d.review_comment.clone()),
        },
        StageId::OutputFormatter => StageSummary::Formatted,
    }
}
