//! Per-stage model resolution with handle caching.
//!
//! Each stage resolves its own model from layered sources; the first source
//! that names a field wins:
//!   1. intake agent overrides, merged over the selected profile entry
//!   2. stage-specific environment variables (`{PREFIX}_MODEL_TYPE`, ...)
//!   3. the intake-level `model_type` hint
//!   4. resolver defaults (local)
//!
//! Resolved handles are cached by their full configuration so repeated
//! stages with identical settings share one client.

use super::ChatModel;
use crate::config::{ModelProfiles, ResolverConfig};
use crate::intake::IntakeRecord;
use crate::stages::StageId;
use crate::types::ModelInfo;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Local,
    Remote,
}

impl ModelType {
    /// Anything other than "local" selects the remote path.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("local") {
            ModelType::Local
        } else {
            ModelType::Remote
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Local => "local",
            ModelType::Remote => "remote",
        }
    }
}

/// Fully-resolved model configuration; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedModelConfig {
    pub model_type: ModelType,
    pub model_name: String,
    pub base_url: Option<String>,
}

/// Builds a chat client from a resolved configuration. Production wires an
/// HTTP factory; tests substitute scripted models.
pub trait ModelFactory: Send + Sync {
    fn build(&self, cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel>;
}

/// A resolved handle plus the attribution record stages report.
#[derive(Clone)]
pub struct ResolvedModel {
    pub handle: Arc<dyn ChatModel>,
    pub info: ModelInfo,
}

pub struct ModelResolver {
    profiles: ModelProfiles,
    env: HashMap<String, String>,
    defaults: ResolverConfig,
    factory: Arc<dyn ModelFactory>,
    handles: DashMap<ResolvedModelConfig, Arc<dyn ChatModel>>,
}

impl ModelResolver {
    pub fn new(
        profiles: ModelProfiles,
        defaults: ResolverConfig,
        factory: Arc<dyn ModelFactory>,
    ) -> Self {
        Self::with_env(profiles, defaults, factory, std::env::vars().collect())
    }

    /// Construct with an explicit environment snapshot instead of the
    /// process environment.
    pub fn with_env(
        profiles: ModelProfiles,
        defaults: ResolverConfig,
        factory: Arc<dyn ModelFactory>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            profiles,
            env,
            defaults,
            factory,
            handles: DashMap::new(),
        }
    }

    fn stage_env(&self, stage: StageId, suffix: &str) -> Option<&String> {
        self.env.get(&format!("{}_{suffix}", stage.env_prefix()))
    }

    /// Resolve the model for one stage of one run. Handles are cached by
    /// resolved configuration, so two stages landing on the same model
    /// share a client.
    pub fn resolve(&self, stage: StageId, intake: &IntakeRecord) -> ResolvedModel {
        let agent = stage.agent_name();
        let profile_cfg = self
            .profiles
            .agent_config(intake.model_profile_id.as_deref(), agent);
        let merged = intake
            .agent_overrides
            .get(agent)
            .cloned()
            .unwrap_or_default()
            .or(&profile_cfg);

        let model_type = merged
            .model_type
            .as_deref()
            .or_else(|| self.stage_env(stage, "MODEL_TYPE").map(String::as_str))
            .or(intake.model_type.as_deref())
            .map(ModelType::parse)
            .unwrap_or(ModelType::Local);

        let cfg = match model_type {
            ModelType::Remote => {
                let model_name = merged
                    .model_name
                    .clone()
                    .or_else(|| self.stage_env(stage, "REMOTE_MODEL").cloned())
                    .unwrap_or_else(|| self.defaults.remote_model.clone());
                ResolvedModelConfig {
                    model_type,
                    model_name,
                    base_url: merged.base_url.clone(),
                }
            }
            ModelType::Local => {
                let model_name = merged
                    .model_name
                    .clone()
                    .or_else(|| self.stage_env(stage, "LOCAL_MODEL").cloned())
                    .unwrap_or_else(|| self.defaults.local_model.clone());
                let model_path = merged
                    .model_path
                    .clone()
                    .or_else(|| self.stage_env(stage, "LOCAL_MODEL_PATH").cloned());
                let model_name = match model_path {
                    Some(path) => self.resolve_local_path(&path, &model_name),
                    None => model_name,
                };
                let base_url = merged
                    .base_url
                    .clone()
                    .or_else(|| self.stage_env(stage, "LOCAL_URL").cloned())
                    .unwrap_or_else(|| self.defaults.local_url.clone());
                ResolvedModelConfig {
                    model_type,
                    model_name,
                    base_url: Some(base_url),
                }
            }
        };

        let handle = self
            .handles
            .entry(cfg.clone())
            .or_insert_with(|| {
                debug!(stage = %stage, model = %cfg.model_name, kind = cfg.model_type.as_str(), "building model client");
                self.factory.build(&cfg)
            })
            .clone();

        let display = match cfg.model_type {
            ModelType::Local => short_model_name(&cfg.model_name).to_string(),
            ModelType::Remote => cfg.model_name.clone(),
        };
        ResolvedModel {
            handle,
            info: ModelInfo::new(cfg.model_type.as_str(), display),
        }
    }

    /// Resolve a local model path to the identifier the serving endpoint
    /// expects. Missing paths fall back to the plain model name.
    fn resolve_local_path(&self, path: &str, model_name: &str) -> String {
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else if path.starts_with("models/") || path.starts_with("models\\") {
            self.defaults.project_root.join(path)
        } else {
            self.defaults.models_root.join(path)
        };
        if candidate.exists() {
            candidate.to_string_lossy().into_owned()
        } else {
            warn!(path = %candidate.display(), "local model path not found; using model name");
            model_name.to_string()
        }
    }
}

fn short_model_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentModelConfig, ModelProfile};
    use crate::model::ScriptedModel;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
            }
        }
    }

    impl ModelFactory for CountingFactory {
        fn build(&self, _cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel> {
            self.builds.fetch_add(1, Ordering::Relaxed);
            Arc::new(ScriptedModel::always("{}"))
        }
    }

    fn intake(extra: serde_json::Value) -> IntakeRecord {
        let mut base = json!({
            "body_part": "head",
            "symptom_names": ["headache"],
            "severity": 3,
            "duration": "1To3Days"
        });
        if let (Some(b), Some(e)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                b.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    fn resolver(env: HashMap<String, String>) -> (ModelResolver, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::new());
        let r = ModelResolver::with_env(
            ModelProfiles::default(),
            ResolverConfig::default(),
            factory.clone(),
            env,
        );
        (r, factory)
    }

    #[test]
    fn defaults_to_local_model() {
        let (r, _) = resolver(HashMap::new());
        let resolved = r.resolve(StageId::DiagnosisGenerator, &intake(json!({})));
        assert_eq!(resolved.info.model_type, "local");
        assert_eq!(resolved.info.model, "Qwen3-0.6B");
    }

    #[test]
    fn intake_model_type_selects_remote() {
        let (r, _) = resolver(HashMap::new());
        let resolved = r.resolve(
            StageId::DiagnosisGenerator,
            &intake(json!({"model_type": "remote"})),
        );
        assert_eq!(resolved.info.model_type, "remote");
        assert_eq!(resolved.info.model, "gpt-5-mini");
    }

    #[test]
    fn stage_env_beats_intake_hint() {
        let mut env = HashMap::new();
        env.insert(
            "DIAGNOSIS_GENERATOR_MODEL_TYPE".to_string(),
            "local".to_string(),
        );
        env.insert(
            "DIAGNOSIS_GENERATOR_LOCAL_MODEL".to_string(),
            "org/custom-model".to_string(),
        );
        let (r, _) = resolver(env);
        let resolved = r.resolve(
            StageId::DiagnosisGenerator,
            &intake(json!({"model_type": "remote"})),
        );
        assert_eq!(resolved.info.model_type, "local");
        assert_eq!(resolved.info.model, "custom-model");
    }

    #[test]
    fn intake_override_beats_env() {
        let mut env = HashMap::new();
        env.insert(
            "DIAGNOSIS_GENERATOR_MODEL_TYPE".to_string(),
            "local".to_string(),
        );
        let (r, _) = resolver(env);
        let resolved = r.resolve(
            StageId::DiagnosisGenerator,
            &intake(json!({
                "agent_overrides": {
                    "diagnosis_generator": {"model_type": "remote", "model_name": "gpt-4o"}
                }
            })),
        );
        assert_eq!(resolved.info.model_type, "remote");
        assert_eq!(resolved.info.model, "gpt-4o");
    }

    #[test]
    fn profile_fills_gaps_under_intake_override() {
        let mut agents = HashMap::new();
        agents.insert(
            "diagnosis_generator".to_string(),
            AgentModelConfig {
                model_type: Some("remote".to_string()),
                model_name: Some("profile-model".to_string()),
                ..Default::default()
            },
        );
        let mut table = HashMap::new();
        table.insert("fast".to_string(), ModelProfile { agents });
        let factory = Arc::new(CountingFactory::new());
        let r = ModelResolver::with_env(
            ModelProfiles::new(table),
            ResolverConfig::default(),
            factory,
            HashMap::new(),
        );
        // Override names only the model; the type comes from the profile.
        let resolved = r.resolve(
            StageId::DiagnosisGenerator,
            &intake(json!({
                "agent_overrides": {
                    "diagnosis_generator": {"model_name": "override-model"}
                }
            })),
        );
        assert_eq!(resolved.info.model_type, "remote");
        assert_eq!(resolved.info.model, "override-model");
    }

    #[test]
    fn identical_configs_share_one_client() {
        let (r, factory) = resolver(HashMap::new());
        let record = intake(json!({}));
        r.resolve(StageId::SymptomNormalizer, &record);
        r.resolve(StageId::DiagnosisGenerator, &record);
        r.resolve(StageId::OutputFormatter, &record);
        assert_eq!(factory.builds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn distinct_models_build_distinct_clients() {
        let (r, factory) = resolver(HashMap::new());
        let record = intake(json!({
            "agent_overrides": {
                "diagnosis_generator": {"model_name": "a"},
                "drug_recommender": {"model_name": "b"}
            }
        }));
        r.resolve(StageId::DiagnosisGenerator, &record);
        r.resolve(StageId::DrugRecommender, &record);
        r.resolve(StageId::DiagnosisGenerator, &record);
        assert_eq!(factory.builds.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn missing_local_path_falls_back_to_name() {
        let (r, _) = resolver(HashMap::new());
        let resolved = r.resolve(
            StageId::SymptomNormalizer,
            &intake(json!({
                "agent_overrides": {
                    "symptom_normalizer": {
                        "model_name": "qwen3-sft",
                        "model_path": "/nonexistent/model/dir"
                    }
                }
            })),
        );
        assert_eq!(resolved.info.model, "qwen3-sft");
    }

    #[test]
    fn existing_local_path_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qwen3-sft");
        std::fs::create_dir(&path).unwrap();
        let (r, _) = resolver(HashMap::new());
        let resolved = r.resolve(
            StageId::SymptomNormalizer,
            &intake(json!({
                "agent_overrides": {
                    "symptom_normalizer": {"model_path": path.to_str().unwrap()}
                }
            })),
        );
        assert_eq!(resolved.info.model, "qwen3-sft");
    }
}
