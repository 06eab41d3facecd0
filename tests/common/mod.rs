//! Shared fixtures for pipeline scenario tests.
//!
//! Stages are routed to dedicated scripted models through intake agent
//! overrides: each override names a distinct model, the resolver caches by
//! full configuration, and `MapFactory` hands out the scripted model
//! registered under that name.

use dxflow::{
    ChatModel, IntakeRecord, ModelFactory, ModelProfiles, ModelResolver, Pipeline,
    PipelineConfig, ResolvedModelConfig, ResolverConfig, RetrievalAdapter, ScriptedModel,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Routes by resolved model name; unknown names get the default model.
pub struct MapFactory {
    by_name: HashMap<String, Arc<ScriptedModel>>,
    default: Arc<ScriptedModel>,
}

impl MapFactory {
    pub fn new(default: Arc<ScriptedModel>) -> Self {
        Self {
            by_name: HashMap::new(),
            default,
        }
    }

    pub fn register(mut self, name: &str, model: Arc<ScriptedModel>) -> Self {
        self.by_name.insert(name.to_string(), model);
        self
    }
}

impl ModelFactory for MapFactory {
    fn build(&self, cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel> {
        self.by_name
            .get(&cfg.model_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

pub fn minimal_intake() -> IntakeRecord {
    serde_json::from_value(json!({
        "body_part": "head",
        "symptom_names": ["headache", "fever"],
        "severity": 3,
        "duration": "1To3Days"
    }))
    .unwrap()
}

/// Route one agent to a dedicated model name.
pub fn route(intake: &mut IntakeRecord, agent: &str, model_name: &str) {
    intake.agent_overrides.insert(
        agent.to_string(),
        serde_json::from_value(json!({"model_name": model_name})).unwrap(),
    );
}

pub fn pipeline(factory: MapFactory) -> Pipeline {
    let resolver = ModelResolver::with_env(
        ModelProfiles::default(),
        ResolverConfig::default(),
        Arc::new(factory),
        HashMap::new(),
    );
    Pipeline::new(
        resolver,
        RetrievalAdapter::disabled(),
        PipelineConfig::default(),
    )
}

pub fn valid_preprocess_json() -> String {
    json!({
        "optimized_symptoms": "患者头部胀痛，伴低热，持续1至3天",
        "rag_keywords": ["头痛", "发热", "头部胀痛"]
    })
    .to_string()
}

pub fn passing_grade_json() -> String {
    json!({"score": 4, "comment": "描述完整，关键词覆盖主要症状", "isValid": true}).to_string()
}

pub fn relevance_json(score: u8) -> String {
    json!({"ragScore": score, "ragComment": "资料覆盖主要症状"}).to_string()
}

pub fn evidence_json(score: u8) -> String {
    json!({"diagnosisScore": score, "diagnosisComment": "诊断与资料一致"}).to_string()
}

pub fn diagnosis_json() -> String {
    json!({
        "results": [
            {"condition": "偏头痛", "probability": 0.6, "description": "常见原发性头痛"},
            {"condition": "紧张性头痛", "probability": 0.3, "description": "与压力相关"},
            {"condition": "上呼吸道感染", "probability": 0.1, "description": "伴发热时可能"}
        ],
        "recommendations": ["建议神经内科就诊", "记录头痛日记", "避免诱发因素"],
        "recomm_short": ["多休息", "多喝水", "避免熬夜"]
    })
    .to_string()
}

pub fn drug_json(condition: &str) -> String {
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

pub fn review_json(p1: f64, p2: f64, p3: f64) -> String {
    json!({
        "review_comment": "概率分配已校验",
        "results": [
            {"probability": p1},
            {"probability": p2},
            {"probability": p3}
        ]
    })
    .to_string()
}
