//! Stage 6: diagnosis evidence grading.
//!
//! Same grading policy as the relevance stage, applied to the generated
//! diagnosis against the retrieved context. The resulting score steers how
//! much the drug recommender trusts that context.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::parse::{extract_score, normalize_evidence, salvage_json, ScoreGrade};
use crate::prompts;
use crate::retry::invoke_with_retry;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use tracing::info;

const NEUTRAL_COMMENT: &str = "解析失败，使用默认中等评分";

pub struct DrugEvidenceGrader;

#[async_trait]
impl Stage for DrugEvidenceGrader {
    fn id(&self) -> StageId {
        StageId::DrugEvidenceGrader
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let Some(diagnosis) = state.diagnosis.as_ref() else {
            return Ok(StateUpdate::default()
                .evidence_grade(Some(3), NEUTRAL_COMMENT.to_string()));
        };

        let resolved = cx.resolver.resolve(self.id(), cx.intake);
        let messages = prompts::evidence(diagnosis, &state.rag_docs);

        let mut best_effort: Option<ScoreGrade> = None;
        let full = invoke_with_retry(
            &resolved.handle,
            self.id().agent_name(),
            &messages,
            cx.config.max_model_tries,
            cx.config.call_timeout,
            |text| {
                let v = salvage_json(text)?;
                if let Some(grade) = normalize_evidence(&v) {
                    return Some(grade);
                }
                if best_effort.is_none() {
                    best_effort = extract_score(&v, "diagnosisScore", "diagnosisComment");
                }
                None
            },
        )
        .await;

        let grade = full.or(best_effort).unwrap_or(ScoreGrade {
            score: 3,
            comment: NEUTRAL_COMMENT.to_string(),
        });
        info!(score = grade.score, "diagnosis evidence graded");
        Ok(StateUpdate::default()
            .evidence_grade(Some(grade.score), grade.comment)
            .model(self.id().agent_name(), resolved.info))
    }
}
