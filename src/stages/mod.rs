//! The nine pipeline stages, executed in fixed order.
//!
//! Each stage reads the shared state, does its work (usually one or more
//! model calls) and returns a `StateUpdate`. Stage errors abort the run;
//! model failures never surface here because every stage degrades to a
//! deterministic fallback.

mod drugs;
mod evidence;
mod format;
mod generate;
mod normalize;
mod quality;
mod relevance;
mod retrieve;
mod review;

pub use drugs::DrugRecommender;
pub use evidence::DrugEvidenceGrader;
pub use format::OutputFormatter;
pub use generate::DiagnosisGenerator;
pub use normalize::SymptomNormalizer;
pub use quality::SymptomQualityGrader;
pub use relevance::RagRelevanceGrader;
pub use retrieve::RagRetriever;
pub use review::DiagnosisReviewer;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::intake::IntakeRecord;
use crate::model::ModelResolver;
use crate::retrieval::RetrievalAdapter;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SymptomNormalizer,
    SymptomQualityGrader,
    RagRetriever,
    RagRelevanceGrader,
    DiagnosisGenerator,
    DrugEvidenceGrader,
    DrugRecommender,
    DiagnosisReviewer,
    OutputFormatter,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::SymptomNormalizer,
        StageId::SymptomQualityGrader,
        StageId::RagRetriever,
        StageId::RagRelevanceGrader,
        StageId::DiagnosisGenerator,
        StageId::DrugEvidenceGrader,
        StageId::DrugRecommender,
        StageId::DiagnosisReviewer,
        StageId::OutputFormatter,
    ];

    /// Agent name used in profiles, intake overrides and attribution maps.
    pub fn agent_name(&self) -> &'static str {
        match self {
            StageId::SymptomNormalizer => "symptom_normalizer",
            StageId::SymptomQualityGrader => "symptom_quality_grader",
            StageId::RagRetriever => "rag_retriever",
            StageId::RagRelevanceGrader => "rag_relevance_grader",
            StageId::DiagnosisGenerator => "diagnosis_generator",
            StageId::DrugEvidenceGrader => "drug_evidence_grader",
            StageId::DrugRecommender => "drug_recommender",
            StageId::DiagnosisReviewer => "diagnosis_reviewer",
            StageId::OutputFormatter => "output_formatter",
        }
    }

    /// Human-facing stage label for progress reporting.
    pub fn label(&self) -> &'static str {
        match self {
            StageId::SymptomNormalizer => "症状标准化",
            StageId::SymptomQualityGrader => "症状质量评估",
            StageId::RagRetriever => "知识库检索",
            StageId::RagRelevanceGrader => "检索相关度评估",
            StageId::DiagnosisGenerator => "诊断生成",
            StageId::DrugEvidenceGrader => "诊断证据评估",
            StageId::DrugRecommender => "用药推荐",
            StageId::DiagnosisReviewer => "诊断概率校验",
            StageId::OutputFormatter => "输出格式化",
        }
    }

    /// Prefix of this stage's environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            StageId::SymptomNormalizer => "SYMPTOM_NORMALIZER",
            StageId::SymptomQualityGrader => "SYMPTOM_QUALITY_GRADER",
            StageId::RagRetriever => "RAG_RETRIEVER",
            StageId::RagRelevanceGrader => "RAG_RELEVANCE_GRADER",
            StageId::DiagnosisGenerator => "DIAGNOSIS_GENERATOR",
            StageId::DrugEvidenceGrader => "DRUG_EVIDENCE_GRADER",
            StageId::DrugRecommender => "DRUG_RECOMMENDER",
            StageId::DiagnosisReviewer => "DIAGNOSIS_REVIEWER",
            StageId::OutputFormatter => "OUTPUT_FORMATTER",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// Everything a stage needs besides the state: the intake record and the
/// engine's shared services.
pub struct StageContext<'a> {
    pub intake: &'a IntakeRecord,
    pub resolver: &'a ModelResolver,
    pub retrieval: &'a RetrievalAdapter,
    pub config: &'a PipelineConfig,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError>;
}

/// The full pipeline in execution order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(SymptomNormalizer),
        Box::new(SymptomQualityGrader),
        Box::new(RagRetriever),
        Box::new(RagRelevanceGrader),
        Box::new(DiagnosisGenerator),
        Box::new(DrugEvidenceGrader),
        Box::new(DrugRecommender),
        Box::new(DiagnosisReviewer),
        Box::new(OutputFormatter),
    ]
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::StageContext;
    use crate::config::{ModelProfiles, PipelineConfig, ResolverConfig};
    use crate::intake::IntakeRecord;
    use crate::model::{ChatModel, ModelFactory, ModelResolver, ResolvedModelConfig, ScriptedModel};
    use crate::retrieval::RetrievalAdapter;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Hands every stage the same scripted model regardless of resolution.
    struct SharedFactory(Arc<ScriptedModel>);

    impl ModelFactory for SharedFactory {
        fn build(&self, _cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel> {
            self.0.clone()
        }
    }

    pub fn minimal_intake() -> IntakeRecord {
        serde_json::from_value(serde_json::json!({
            "body_part": "head",
            "symptom_names": ["headache", "fever"],
            "severity": 3,
            "duration": "1To3Days"
        }))
        .unwrap()
    }

    pub fn scripted_resolver(responses: Vec<&str>) -> (ModelResolver, Arc<ScriptedModel>) {
        let scripted = Arc::new(ScriptedModel::new(responses));
        let resolver = ModelResolver::with_env(
            ModelProfiles::default(),
            ResolverConfig::default(),
            Arc::new(SharedFactory(scripted.clone())),
            HashMap::new(),
        );
        (resolver, scripted)
    }

    pub fn steady_resolver(response: &str) -> (ModelResolver, Arc<ScriptedModel>) {
        let scripted = Arc::new(ScriptedModel::always(response));
        let resolver = ModelResolver::with_env(
            ModelProfiles::default(),
            ResolverConfig::default(),
            Arc::new(SharedFactory(scripted.clone())),
            HashMap::new(),
        );
        (resolver, scripted)
    }

    pub fn context<'a>(
        intake: &'a IntakeRecord,
        resolver: &'a ModelResolver,
        retrieval: &'a RetrievalAdapter,
        config: &'a PipelineConfig,
    ) -> StageContext<'a> {
        StageContext {
            intake,
            resolver,
            retrieval,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_matches_stage_list() {
        let stages = default_stages();
        assert_eq!(stages.len(), StageId::ALL.len());
        for (stage, id) in stages.iter().zip(StageId::ALL) {
            assert_eq!(stage.id(), id);
        }
    }

    #[test]
    fn agent_names_are_unique() {
        let mut names: Vec<_> = StageId::ALL.iter().map(|s| s.agent_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 9);
    }
}
