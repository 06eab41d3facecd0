//! Stage 8: diagnosis probability review.
//!
//! A reviewer model sanity-checks the probability assignment against the
//! patient description and may adjust it. Adjustments merge per index, field
//! by field, so a partial reviewer answer never erases generated content.
//! Probabilities renormalize whenever the reviewed sum drifts.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_preprocess;
use crate::parse::salvage_json;
use crate::prompts;
use crate::retry::invoke_with_retry;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub struct DiagnosisReviewer;

#[async_trait]
impl Stage for DiagnosisReviewer {
    fn id(&self) -> StageId {
        StageId::DiagnosisReviewer
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        let Some(diagnosis) = state.diagnosis.as_ref() else {
            return Ok(StateUpdate::default());
        };
        let resolved = cx.resolver.resolve(self.id(), cx.intake);

        let original_summary = fallback_preprocess(cx.intake).optimized_symptoms;
        let messages = prompts::reviewer(
            &original_summary,
            &state.optimized_symptoms,
            &diagnosis.results,
        );
        let reviewed = invoke_with_retry(
            &resolved.handle,
            self.id().agent_name(),
            &messages,
            cx.config.max_model_tries,
            cx.config.call_timeout,
            |text| {
                let v = salvage_json(text)?;
                let non_empty = v
                    .get("results")
                    .and_then(Value::as_array)
                    .is_some_and(|rows| !rows.is_empty());
                non_empty.then_some(v)
            },
        )
        .await;

        let Some(review) = reviewed else {
            warn!("review retries exhausted; keeping diagnosis unchanged");
            return Ok(StateUpdate::default().model(self.id().agent_name(), resolved.info));
        };

        let mut updated = diagnosis.clone();
        let rows = review
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for (candidate, row) in updated.results.iter_mut().zip(rows.iter()) {
            if let Some(condition) = row.get("condition").and_then(Value::as_str) {
                if !condition.trim().is_empty() {
                    candidate.condition = condition.trim().to_string();
                }
            }
            if let Some(p) = row.get("probability").and_then(Value::as_f64) {
                if p.is_finite() && p >= 0.0 {
                    candidate.probability = p;
                }
            }
            if let Some(description) = row.get("description").and_then(Value::as_str) {
                if !description.trim().is_empty() {
                    candidate.description = description.trim().to_string();
                }
            }
        }

        let sum: f64 = updated.results.iter().map(|r| r.probability).sum();
        if (sum - 1.0).abs() > 0.01 && sum > 0.0 {
            info!(sum, "reviewed probabilities drifted; renormalizing");
            for candidate in &mut updated.results {
                candidate.probability = (candidate.probability / sum * 100.0).round() / 100.0;
            }
        }

        updated.review_comment = review
            .get("review_comment")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        Ok(StateUpdate::default()
            .diagnosis(updated)
            .model(self.id().agent_name(), resolved.info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests_support::{context, minimal_intake, scripted_resolver, steady_resolver};
    use serde_json::json;

    fn state() -> PipelineState {
        PipelineState {
            optimized_symptoms: "患者头部胀痛".to_string(),
            diagnosis: Some(crate::fallback::fallback_diagnosis()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn drifted_probabilities_are_renormalized() {
        let intake = minimal_intake();
        let response = json!({
            "review_comment": "概率分配偏高，已调整",
            "results": [
                {"condition": "需要进一步检查", "probability": 0.7},
                {"condition": "一般性不适", "probability": 0.4},
                {"condition": "心理因素", "probability": 0.2}
            ]
        })
        .to_string();
        let (resolver, _) = scripted_resolver(vec![&response]);
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DiagnosisReviewer.run(&cx, &state()).await.unwrap();
        let d = update.diagnosis.unwrap();
        let sum: f64 = d.results.iter().map(|r| r.probability).sum();
        assert!((sum - 1.0).abs() < 0.011);
        assert_eq!(d.review_comment.as_deref(), Some("概率分配偏高，已调整"));
        // Descriptions were absent from the review; originals survive.
        assert!(!d.results[0].description.is_empty());
    }

    #[tokio::test]
    async fn partial_rows_keep_original_fields() {
        let intake = minimal_intake();
        let response = json!({
            "results": [
                {"probability": 0.5},
                {"condition": "  ", "probability": 0.3},
                {"condition": "焦虑状态", "probability": 0.2, "description": "新的描述"}
            ]
        })
        .to_string();
        let (resolver, _) = scripted_resolver(vec![&response]);
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DiagnosisReviewer.run(&cx, &state()).await.unwrap();
        let d = update.diagnosis.unwrap();
        assert_eq!(d.results[0].condition, "需要进一步检查");
        assert_eq!(d.results[1].condition, "一般性不适");
        assert_eq!(d.results[2].condition, "焦虑状态");
        assert_eq!(d.results[2].description, "新的描述");
        assert!(d.review_comment.is_none());
    }

    #[tokio::test]
    async fn exhausted_review_keeps_diagnosis_untouched() {
        let intake = minimal_intake();
        let (resolver, _) = steady_resolver("not json");
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DiagnosisReviewer.run(&cx, &state()).await.unwrap();
        assert!(update.diagnosis.is_none());
        assert!(update.agent_model.is_some());
    }
}
