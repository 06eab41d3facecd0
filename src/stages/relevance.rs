//! Stage 4: retrieval relevance grading.
//!
//! Scores how well the retrieved context matches the symptoms. A fully
//! valid grade needs both score and rationale; a response carrying only a
//! usable score is kept as a best-effort answer if no full grade arrives
//! within the retry budget. Total failure lands on a neutral medium grade.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::parse::{extract_score, normalize_relevance, salvage_json, ScoreGrade};
use crate::prompts;
use crate::retry::invoke_with_retry;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use tracing::info;

const NEUTRAL_COMMENT: &str = "解析失败，使用默认中等评分";

pub struct RagRelevanceGrader;

#[async_trait]
impl Stage for RagRelevanceGrader {
    fn id(&self) -> StageId {
        StageId::RagRelevanceGrader
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let resolved = cx.resolver.resolve(self.id(), cx.intake);
        let messages = prompts::relevance(&state.optimized_symptoms, &state.rag_docs);

        let mut best_effort: Option<ScoreGrade> = None;
        let full = invoke_with_retry(
            &resolved.handle,
            self.id().agent_name(),
            &messages,
            cx.config.max_model_tries,
            cx.config.call_timeout,
            |text| {
                let v = salvage_json(text)?;
                if let Some(grade) = normalize_relevance(&v) {
                    return Some(grade);
                }
                if best_effort.is_none() {
                    best_effort = extract_score(&v, "ragScore", "ragComment");
                }
                None
            },
        )
        .await;

        let grade = full.or(best_effort).unwrap_or(ScoreGrade {
            score: 3,
            comment: NEUTRAL_COMMENT.to_string(),
        });
        info!(score = grade.score, "retrieval relevance graded");
        Ok(StateUpdate::default()
            .rag_grade(Some(grade.score), grade.comment)
            .model(self.id().agent_name(), resolved.info))
    }
}
