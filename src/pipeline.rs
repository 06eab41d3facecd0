//! The diagnosis pipeline: nine fixed stages over shared state.
//!
//! The engine validates the intake, runs the stages in order, merges each
//! stage's update into the state and emits a progress event per stage. Only
//! two conditions abort a run: an invalid intake and an empty keyword list
//! at retrieval time. Everything else degrades inside the stages.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fallback::{fallback_diagnosis, fallback_preprocess};
use crate::intake::IntakeRecord;
use crate::model::ModelResolver;
use crate::parse::{normalize_preprocess, salvage_json};
use crate::progress::{summarize, ProgressEvent};
use crate::prompts;
use crate::retrieval::RetrievalAdapter;
use crate::retry::invoke_once;
use crate::stages::{default_stages, Stage, StageContext, StageId};
use crate::state::PipelineState;
use crate::types::{FinalOutput, ModelInfo};
use serde::Serialize;
use tracing::{info, warn};

pub struct Pipeline {
    resolver: ModelResolver,
    retrieval: RetrievalAdapter,
    config: PipelineConfig,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(
        resolver: ModelResolver,
        retrieval: RetrievalAdapter,
        config: PipelineConfig,
    ) -> Self {
        Self::with_stages(resolver, retrieval, config, default_stages())
    }

    /// Build a pipeline over a custom stage list instead of the default
    /// nine.
    pub fn with_stages(
        resolver: ModelResolver,
        retrieval: RetrievalAdapter,
        config: PipelineConfig,
        stages: Vec<Box<dyn Stage>>,
    ) -> Self {
        Self {
            resolver,
            retrieval,
            config,
            stages,
        }
    }

    /// Run the full pipeline without progress reporting.
    pub async fn run(&self, intake: &IntakeRecord) -> Result<FinalOutput, PipelineError> {
        self.run_with_progress(intake, |_| {}).await
    }

    /// Run the full pipeline, invoking `on_progress` after every stage.
    pub async fn run_with_progress<F>(
        &self,
        intake: &IntakeRecord,
        mut on_progress: F,
    ) -> Result<FinalOutput, PipelineError>
    where
        F: FnMut(ProgressEvent),
    {
        intake.validate()?;
        let cx = StageContext {
            intake,
            resolver: &self.resolver,
            retrieval: &self.retrieval,
            config: &self.config,
        };

        let mut state = self.execute(&cx, &mut on_progress).await?;
        if state.final_output.is_none() {
            // The formatter always writes an output; a missing one means a
            // custom stage list ended early. One whole re-invocation, then
            // take whatever the state holds.
            warn!("run ended without formatted output; re-invoking once");
            state = self.execute(&cx, &mut on_progress).await?;
        }

        let mut output = match state.final_output.take() {
            Some(output) => output,
            None => {
                warn!("run ended without formatted output; deriving from state");
                state
                    .diagnosis
                    .take()
                    .map(FinalOutput::from)
                    .unwrap_or_else(|| FinalOutput::from(fallback_diagnosis()))
            }
        };
        if !state.agent_models.is_empty() {
            output.agent_models = Some(state.agent_models);
        }
        if !state.rag_keywords.is_empty() {
            output.rag_keywords = Some(state.rag_keywords);
        }
        Ok(output)
    }

    async fn execute<F>(
        &self,
        cx: &StageContext<'_>,
        on_progress: &mut F,
    ) -> Result<PipelineState, PipelineError>
    where
        F: FnMut(ProgressEvent),
    {
        let total = self.stages.len();
        let mut state = PipelineState::default();
        for (i, stage) in self.stages.iter().enumerate() {
            let id = stage.id();
            info!(stage = %id, ordinal = i + 1, total, "stage start");
            let update = stage.run(cx, &state).await?;
            let model_info = update.agent_model.as_ref().map(|(_, info)| info.clone());
            state.apply(update);
            on_progress(ProgressEvent {
                stage: id,
                label: id.label(),
                ordinal: i + 1,
                total,
                summary: summarize(id, &state),
                model_info,
            });
        }
        Ok(state)
    }

    /// Normalize the intake without running the rest of the pipeline.
    ///
    /// One model call, no retry loop: callers show the result to the
    /// patient for confirmation, then pass the confirmed values back in the
    /// intake so the full run skips the normalizer model.
    pub async fn preprocess_symptoms(
        &self,
        intake: &IntakeRecord,
    ) -> Result<PreprocessPreview, PipelineError> {
        intake.validate()?;
        let resolved = self.resolver.resolve(StageId::SymptomNormalizer, intake);
        let messages = prompts::normalizer(intake);
        let parsed = invoke_once(
            &resolved.handle,
            StageId::SymptomNormalizer.agent_name(),
            &messages,
            self.config.call_timeout,
        )
        .await
        .and_then(|text| salvage_json(&text))
        .and_then(|v| normalize_preprocess(&v));

        let preprocessed = parsed.unwrap_or_else(|| fallback_preprocess(intake));
        Ok(PreprocessPreview {
            optimized_symptoms: preprocessed.optimized_symptoms,
            rag_keywords: preprocessed.rag_keywords,
            model_info: resolved.info,
        })
    }
}

/// Result of the standalone normalization call.
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessPreview {
    pub optimized_symptoms: String,
    pub rag_keywords: Vec<String>,
    pub model_info: ModelInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelProfiles, ResolverConfig};
    use crate::model::{ChatModel, ModelFactory, ResolvedModelConfig, ScriptedModel};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct SharedFactory(Arc<ScriptedModel>);

    impl ModelFactory for SharedFactory {
        fn build(&self, _cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel> {
            self.0.clone()
        }
    }

    fn pipeline(model: Arc<ScriptedModel>) -> Pipeline {
        let resolver = ModelResolver::with_env(
            ModelProfiles::default(),
            ResolverConfig::default(),
            Arc::new(SharedFactory(model)),
            HashMap::new(),
        );
        Pipeline::new(
            resolver,
            RetrievalAdapter::disabled(),
            PipelineConfig::default(),
        )
    }

    fn intake() -> IntakeRecord {
        serde_json::from_value(serde_json::json!({
            "body_part": "head",
            "symptom_names": ["headache", "fever"],
            "severity": 3,
            "duration": "1To3Days"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn invalid_intake_is_rejected_before_any_stage() {
        let model = Arc::new(ScriptedModel::always("not json"));
        let p = pipeline(model.clone());
        let mut bad = intake();
        bad.severity = 0;
        assert!(matches!(
            p.run(&bad).await,
            Err(PipelineError::InvalidIntake(_))
        ));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn run_aborts_when_retrieval_sees_no_keywords() {
        // Without the normalizer, retrieval is the first stage and the
        // state still holds an empty keyword list.
        let model = Arc::new(ScriptedModel::always("not json"));
        let resolver = ModelResolver::with_env(
            ModelProfiles::default(),
            ResolverConfig::default(),
            Arc::new(SharedFactory(model)),
            HashMap::new(),
        );
        let p = Pipeline::with_stages(
            resolver,
            RetrievalAdapter::disabled(),
            PipelineConfig::default(),
            vec![Box::new(crate::stages::RagRetriever)],
        );
        assert!(matches!(
            p.run(&intake()).await,
            Err(PipelineError::EmptyRetrievalKeywords)
        ));
    }

    #[tokio::test]
    async fn progress_fires_once_per_stage_in_order() {
        let model = Arc::new(ScriptedModel::always("not json"));
        let p = pipeline(model);
        let mut seen = Vec::new();
        p.run_with_progress(&intake(), |event| {
            seen.push((event.ordinal, event.stage));
        })
        .await
        .unwrap();
        assert_eq!(seen.len(), 9);
        for (i, (ordinal, stage)) in seen.iter().enumerate() {
            assert_eq!(*ordinal, i + 1);
            assert_eq!(*stage, StageId::ALL[i]);
        }
    }

    #[tokio::test]
    async fn preprocess_returns_fallback_on_unparseable_output() {
        let model = Arc::new(ScriptedModel::always("not json"));
        let p = pipeline(model);
        let preview = p.preprocess_symptoms(&intake()).await.unwrap();
        assert!(preview.optimized_symptoms.contains("head"));
        assert!(!preview.rag_keywords.is_empty());
        assert_eq!(preview.model_info.model_type, "local");
    }
}
