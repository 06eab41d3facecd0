//! Stage 1: symptom normalization.
//!
//! Turns the structured intake into one normalized Chinese symptom
//! description plus retrieval keywords. When the intake carries confirmed
//! values from an earlier preprocess round, they are reused verbatim and no
//! model is called.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_preprocess;
use crate::parse::{normalize_preprocess, salvage_json};
use crate::retry::invoke_with_retry;
use crate::prompts;
use crate::state::{PipelineState, StateUpdate};
use crate::types::ModelInfo;
use async_trait::async_trait;
use tracing::info;

pub struct SymptomNormalizer;

#[async_trait]
impl Stage for SymptomNormalizer {
    fn id(&self) -> StageId {
        StageId::SymptomNormalizer
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        _state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        if let Some((symptoms, keywords)) = cx.intake.confirmed() {
            info!("reusing confirmed normalization; skipping model call");
            return Ok(StateUpdate::default()
                .symptoms(symptoms, keywords)
                .model(
                    self.id().agent_name(),
                    ModelInfo::new("user_confirmed", "用户确认"),
                ));
        }

        let resolved = cx.resolver.resolve(self.id(), cx.intake);
        let messages = prompts::normalizer(cx.intake);
        let parsed = invoke_with_retry(
            &resolved.handle,
            self.id().agent_name(),
            &messages,
            cx.config.max_model_tries,
            cx.config.call_timeout,
            |text| salvage_json(text).and_then(|v| normalize_preprocess(&v)),
        )
        .await;

        let preprocessed = match parsed {
            Some(p) => p,
            None => {
                info!("normalization retries exhausted; using structured fallback");
                fallback_preprocess(cx.intake)
            }
        };

        Ok(StateUpdate::default()
            .symptoms(preprocessed.optimized_symptoms, preprocessed.rag_keywords)
            .model(self.id().agent_name(), resolved.info))
    }
}
