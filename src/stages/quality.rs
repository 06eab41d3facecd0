//! Stage 2: normalization quality gate with a bounded refine loop.
//!
//! Grades the normalized description and keywords; a failing grade sends
//! the critic's comment back through the normalizer model for another
//! attempt. Each round grades with a single call; a response that cannot
//! be parsed passes by default so a weak grader model can never stall the
//! pipeline.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_keywords;
use crate::parse::{normalize_critic, normalize_preprocess, salvage_json, CriticGrade};
use crate::prompts;
use crate::retry::{invoke_once, invoke_with_retry};
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use tracing::{info, warn};

fn default_grade() -> CriticGrade {
    CriticGrade {
        score: 3,
        comment: "默认通过（小模型容错）".to_string(),
        is_valid: true,
    }
}

pub struct SymptomQualityGrader;

#[async_trait]
impl Stage for SymptomQualityGrader {
    fn id(&self) -> StageId {
        StageId::SymptomQualityGrader
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let grader = cx.resolver.resolve(self.id(), cx.intake);
        let normalizer = cx.resolver.resolve(StageId::SymptomNormalizer, cx.intake);

        let mut symptoms = state.optimized_symptoms.clone();
        let mut keywords = state.rag_keywords.clone();

        for round in 1..=cx.config.refine_max_tries {
            let messages = prompts::quality(&symptoms, &keywords);
            let grade = invoke_once(
                &grader.handle,
                self.id().agent_name(),
                &messages,
                cx.config.call_timeout,
            )
            .await
            .and_then(|text| salvage_json(&text))
            .and_then(|v| normalize_critic(&v))
            .unwrap_or_else(default_grade);

            if grade.is_valid && grade.score >= 3 {
                info!(round, score = grade.score, "normalization passed quality gate");
                return Ok(StateUpdate::default()
                    .symptoms(symptoms, keywords)
                    .model(self.id().agent_name(), grader.info));
            }
            if round == cx.config.refine_max_tries {
                break;
            }

            info!(round, score = grade.score, comment = %grade.comment, "refining normalization");
            let refine_messages = prompts::refine(cx.intake, &symptoms, &keywords, &grade);
            let refined = invoke_with_retry(
                &normalizer.handle,
                self.id().agent_name(),
                &refine_messages,
                cx.config.max_model_tries,
                cx.config.call_timeout,
                |text| salvage_json(text).and_then(|v| normalize_preprocess(&v)),
            )
            .await;
            if let Some(p) = refined {
                symptoms = p.optimized_symptoms;
                keywords = p.rag_keywords;
            }
        }

        warn!("refine loop exhausted; keeping description with structured keywords");
        Ok(StateUpdate::default()
            .symptoms(symptoms, fallback_keywords(cx.intake))
            .model(self.id().agent_name(), grader.info))
    }
}
