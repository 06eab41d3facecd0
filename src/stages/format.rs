//! Stage 9: output validation and shaping.
//!
//! Revalidates the accumulated diagnosis through the same normalizer the
//! generator used (keeping extra recommendation sections) and shapes it
//! into the final output. A diagnosis that no longer validates is replaced
//! wholesale by the fixed fallback.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_diagnosis;
use crate::parse::normalize_diagnosis;
use crate::state::{PipelineState, StateUpdate};
use crate::types::FinalOutput;
use async_trait::async_trait;
use tracing::warn;

pub struct OutputFormatter;

#[async_trait]
impl Stage for OutputFormatter {
    fn id(&self) -> StageId {
        StageId::OutputFormatter
    }

    async fn run(
        &self,
        _cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let diagnosis = state.diagnosis.clone().unwrap_or_else(|| {
            warn!("no diagnosis reached formatting; using fixed fallback");
            fallback_diagnosis()
        });

        let review_comment = diagnosis.review_comment.clone();
        let validated = serde_json::to_value(&diagnosis)
            .ok()
            .and_then(|v| normalize_diagnosis(&v, true));

        let output = match validated {
            Some(mut d) => {
                d.review_comment = review_comment;
                FinalOutput::from(d)
            }
            None => {
                warn!("accumulated diagnosis failed final validation; using fixed fallback");
                FinalOutput::from(fallback_diagnosis())
            }
        };
        Ok(StateUpdate::default().output(output))
    }
}
