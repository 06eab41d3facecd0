//! Configuration surface: model profiles, resolver defaults, engine tuning.
//!
//! Profiles map a profile id to per-stage model configuration. The table is
//! loaded from a JSON file; a missing or unreadable file is a warning and
//! yields an empty table, never an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Profile id used when the intake carries none.
pub const DEFAULT_PROFILE: &str = "fast";

/// Per-stage model configuration, as found in profiles and intake overrides.
/// All fields optional; resolution fills the gaps from lower-precedence
/// sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentModelConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl AgentModelConfig {
    /// Field-wise merge: `self` wins, `other` fills the gaps.
    pub fn or(self, other: &AgentModelConfig) -> AgentModelConfig {
        AgentModelConfig {
            model_type: self.model_type.or_else(|| other.model_type.clone()),
            model_name: self.model_name.or_else(|| other.model_name.clone()),
            model_path: self.model_path.or_else(|| other.model_path.clone()),
            base_url: self.base_url.or_else(|| other.base_url.clone()),
        }
    }
}

/// One named profile: agent name → model configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelProfile {
    #[serde(default)]
    pub agents: HashMap<String, AgentModelConfig>,
}

/// The profile table, keyed by profile id.
#[derive(Debug, Clone, Default)]
pub struct ModelProfiles {
    profiles: HashMap<String, ModelProfile>,
}

impl ModelProfiles {
    pub fn new(profiles: HashMap<String, ModelProfile>) -> Self {
        Self { profiles }
    }

    /// Load from a JSON file. Missing or malformed files degrade to an
    /// empty table with a warning, matching the supported no-profile mode.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(profiles) => Self { profiles },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "model profiles file is malformed; using empty table");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "model profiles file not readable; using empty table");
                Self::default()
            }
        }
    }

    /// Agent configuration from the requested profile, falling back to the
    /// default profile when the id is unknown.
    pub fn agent_config(&self, profile_id: Option<&str>, agent: &str) -> AgentModelConfig {
        let id = profile_id.unwrap_or(DEFAULT_PROFILE);
        let profile = self
            .profiles
            .get(id)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE));
        profile
            .and_then(|p| p.agents.get(agent))
            .cloned()
            .unwrap_or_default()
    }
}

/// Defaults the resolver falls back to when no higher-precedence source
/// names a model.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub local_model: String,
    pub remote_model: String,
    pub local_url: String,
    pub models_root: PathBuf,
    pub project_root: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            local_model: "Qwen/Qwen3-0.6B".to_string(),
            remote_model: "gpt-5-mini".to_string(),
            local_url: "http://localhost:8000/v1".to_string(),
            models_root: PathBuf::from("models"),
            project_root: PathBuf::from("."),
        }
    }
}

impl ResolverConfig {
    /// Build defaults from an environment snapshot.
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env.get("DXFLOW_LOCAL_MODEL") {
            cfg.local_model = v.clone();
        }
        if let Some(v) = env.get("DXFLOW_REMOTE_MODEL") {
            cfg.remote_model = v.clone();
        }
        if let Some(v) = env.get("DXFLOW_LOCAL_URL") {
            cfg.local_url = v.clone();
        }
        if let Some(v) = env.get("DXFLOW_MODELS_ROOT") {
            cfg.models_root = PathBuf::from(v);
        }
        cfg
    }
}

/// Engine tuning knobs shared by all stages of one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded retry count for every model call (including the first try).
    pub max_model_tries: u32,
    /// Iteration cap of the quality refine loop.
    pub refine_max_tries: u32,
    /// Similarity search result bound.
    pub retrieval_limit: usize,
    /// Snippet truncation length in characters.
    pub snippet_max_chars: usize,
    /// Per-call timeout for model invocations; a timeout counts as a
    /// failed attempt exactly like a parse failure.
    pub call_timeout: Duration,
    /// Default corpus tag for diagnosis retrieval.
    pub diagnosis_corpus: Option<String>,
    /// Default corpus tag for drug retrieval.
    pub drug_corpus: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_model_tries: 3,
            refine_max_tries: 5,
            retrieval_limit: 5,
            snippet_max_chars: 500,
            call_timeout: Duration::from_secs(60),
            diagnosis_corpus: None,
            drug_corpus: None,
        }
    }
}

impl PipelineConfig {
    /// Apply environment overrides from a snapshot.
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env
            .get("DXFLOW_MAX_MODEL_TRIES")
            .and_then(|v| v.parse().ok())
        {
            cfg.max_model_tries = n;
        }
        if let Some(v) = env.get("DXFLOW_RAG_CORPUS") {
            cfg.diagnosis_corpus = Some(v.clone());
        }
        if let Some(v) = env.get("DXFLOW_DRUG_RAG_CORPUS") {
            cfg.drug_corpus = Some(v.clone());
        }
        cfg
    }
}
