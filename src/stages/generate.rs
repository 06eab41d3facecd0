//! Stage 5: diagnosis generation.
//!
//! Produces three candidate conditions with normalized probabilities. When
//! the relevance grade says the retrieved context is near-useless (below 2)
//! the model is not consulted at all; the fixed low-confidence diagnosis is
//! used instead.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_diagnosis;
use crate::parse::{normalize_diagnosis, salvage_json};
use crate::prompts;
use crate::retry::invoke_with_retry;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct DiagnosisGenerator;

#[async_trait]
impl Stage for DiagnosisGenerator {
    fn id(&self) -> StageId {
        StageId::DiagnosisGenerator
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let resolved = cx.resolver.resolve(self.id(), cx.intake);

        if let Some(score) = state.rag_score {
            if score < 2 {
                warn!(score, "retrieved context graded irrelevant; skipping generation");
                return Ok(StateUpdate::default()
                    .diagnosis(fallback_diagnosis())
                    .model(self.id().agent_name(), resolved.info));
            }
        }

        let messages = prompts::diagnosis(
            &state.optimized_symptoms,
            &state.rag_docs,
            state.rag_score,
            &state.rag_comment,
        );
        let diagnosis = invoke_with_retry(
            &resolved.handle,
            self.id().agent_name(),
            &messages,
            cx.config.max_model_tries,
            cx.config.call_timeout,
            |text| salvage_json(text).and_then(|v| normalize_diagnosis(&v, false)),
        )
        .await;

        let diagnosis = match diagnosis {
            Some(d) => {
                info!(candidates = d.results.len(), "diagnosis generated");
                d
            }
            None => {
                warn!("diagnosis retries exhausted; using fixed fallback");
                fallback_diagnosis()
            }
        };
        Ok(StateUpdate::default()
            .diagnosis(diagnosis)
            .model(self.id().agent_name(), resolved.info))
    }
}
