//! Stage 7: per-condition drug recommendation.
//!
//! Runs one model call per diagnosis candidate, each backed by a drug-corpus
//! retrieval when the backend is configured. A candidate whose calls exhaust
//! gets the fixed consult-a-doctor entry. The formatted per-condition
//! sections are appended after the generated recommendations, followed by an
//! optional model-written summary section.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::fallback_drug_entry;
use crate::parse::{normalize_drugs, salvage_json};
use crate::prompts;
use crate::retry::{invoke_once, invoke_with_retry};
use crate::state::{PipelineState, StateUpdate};
use crate::types::DrugEntry;
use async_trait::async_trait;
use tracing::{info, warn};

pub struct DrugRecommender;

impl DrugRecommender {
    /// Condition-scoped retrieval. Errors, empty hits and an unconfigured
    /// backend all mean the recommendation runs without context.
    async fn condition_context(cx: &StageContext<'_>, condition: &str) -> String {
        if cx.retrieval.is_configured() {
            let corpus = cx
                .intake
                .drug_rag_corpus
                .as_deref()
                .or(cx.config.drug_corpus.as_deref());
            match cx
                .retrieval
                .fetch(condition, cx.config.retrieval_limit, corpus)
                .await
            {
                Ok(docs) if !docs.is_empty() => {
                    return serde_json::to_string_pretty(&docs).unwrap_or_default();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(condition, error = %e, "drug retrieval failed; continuing without context");
                }
            }
        }
        "无相关资料".to_string()
    }
}

#[async_trait]
impl Stage for DrugRecommender {
    fn id(&self) -> StageId {
        StageId::DrugRecommender
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

        let mut entries: Vec<DrugEntry> = Vec::with_capacity(diagnosis.results.len());
        for candidate in &diagnosis.results {
            let context = Self::condition_context(cx, &candidate.condition).await;
            let messages = prompts::drug(
                &candidate.condition,
                &context,
                state.evidence_score,
                &state.evidence_comment,
            );
            let parsed = invoke_with_retry(
                &resolved.handle,
                self.id().agent_name(),
                &messages,
                cx.config.max_model_tries,
                cx.config.call_timeout,
                |text| salvage_json(text).and_then(|v| normalize_drugs(&v)),
            )
            .await;

            let entry = match parsed.and_then(|mut list| {
                if list.is_empty() {
                    None
                } else {
                    Some(list.swap_remove(0))
                }
            }) {
                Some(mut entry) => {
                    // Keep the entry aligned with the candidate it was asked about.
                    entry.condition = candidate.condition.clone();
                    entry
                }
                None => {
                    warn!(condition = %candidate.condition, "drug retries exhausted; using fixed entry");
                    fallback_drug_entry(&candidate.condition)
                }
            };
            entries.push(entry);
        }

        let mut recommendations = diagnosis.recommendations.clone();
        recommendations.extend(entries.iter().map(format_entry));
        let summary_messages = prompts::drug_summary(&entries);
        if let Some(summary) = invoke_once(
            &resolved.handle,
            self.id().agent_name(),
            &summary_messages,
            cx.config.call_timeout,
        )
        .await
        {
            let summary = summary.trim();
            if !summary.is_empty() {
                recommendations.push(format!("【总结建议】\n{summary}"));
            }
        }

        info!(conditions = entries.len(), "drug recommendations assembled");
        let mut updated = diagnosis.clone();
        updated.recommendations = recommendations;
        Ok(StateUpdate::default()
            .diagnosis(updated)
            .model(self.id().agent_name(), resolved.info))
    }
}

fn format_entry(entry: &DrugEntry) -> String {
    let mut section = format!("【{} 用药建议】", entry.condition);
    for drug in &entry.recommended_drugs {
        section.push_str(&format!(
            "\n- {}：{}（{}）",
            drug.name, drug.usage, drug.notes
        ));
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests_support::{context, minimal_intake, scripted_resolver, steady_resolver};
    use serde_json::json;

    fn state() -> PipelineState {
        PipelineState {
            optimized_symptoms: "患者头部胀痛".to_string(),
            rag_docs: vec![crate::fallback::mock_document("患者头部胀痛")],
            diagnosis: Some(crate::fallback::fallback_diagnosis()),
            evidence_score: Some(4),
            evidence_comment: "资料支撑充分".to_string(),
            ..Default::default()
        }
    }

    fn drug_json(condition: &str) -> String {
        json!({
            "drugs": [{
                "condition": condition,
                "recommended_drugs": [
                    {"name": "布洛芬", "usage": "每次200mg，每日不超过3次", "notes": "餐后服用"}
                ]
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn builds_one_section_per_condition_plus_summary() {
        let intake = minimal_intake();
        let d1 = drug_json("需要进一步检查");
        let d2 = drug_json("一般性不适");
        let d3 = drug_json("心理因素");
        let (resolver, scripted) =
            scripted_resolver(vec![&d1, &d2, &d3, "请遵医嘱用药，避免药物相互作用。"]);
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DrugRecommender.run(&cx, &state()).await.unwrap();
        let recommendations = update.diagnosis.unwrap().recommendations;
        // Generated advice stays in front of the drug sections.
        assert_eq!(recommendations.len(), 7);
        assert_eq!(recommendations[0], "建议尽快前往正规医院进行详细检查");
        assert!(recommendations[3].starts_with("【需要进一步检查 用药建议】"));
        assert!(recommendations[3].contains("- 布洛芬：每次200mg"));
        assert!(recommendations[6].starts_with("【总结建议】"));
        assert_eq!(scripted.call_count(), 4);
    }

    #[tokio::test]
    async fn exhausted_condition_gets_fixed_entry() {
        let intake = minimal_intake();
        let (resolver, _) = steady_resolver("not json");
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DrugRecommender.run(&cx, &state()).await.unwrap();
        let recommendations = update.diagnosis.unwrap().recommendations;
        // Three generated entries, three fixed sections, then the free-text
        // summary (any text counts).
        assert_eq!(recommendations.len(), 7);
        assert!(recommendations[3].contains("- 请咨询医生：根据具体情况用药（需专业医生指导）"));
        assert!(recommendations[6].contains("not json"));
    }

    #[tokio::test]
    async fn entry_condition_follows_the_candidate() {
        let intake = minimal_intake();
        let mismatched = drug_json("完全不同的病名");
        let (resolver, _) = steady_resolver(&mismatched);
        let config = crate::config::PipelineConfig::default();
        let retrieval = crate::retrieval::RetrievalAdapter::disabled();
        let cx = context(&intake, &resolver, &retrieval, &config);

        let update = DrugRecommender.run(&cx, &state()).await.unwrap();
        let recommendations = update.diagnosis.unwrap().recommendations;
        assert!(recommendations[3].starts_with("【需要进一步检查 用药建议】"));
    }
}
