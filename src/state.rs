//! Shared pipeline state and the update records stages emit.
//!
//! Stages never mutate state directly; each returns a `StateUpdate` and the
//! engine merges it. Merge is overwrite-if-present for every field except
//! model attributions, which accumulate across stages.

use crate::types::{Diagnosis, Document, FinalOutput, ModelInfo};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub optimized_symptoms: String,
    pub rag_keywords: Vec<String>,
    pub rag_docs: Vec<Document>,
    pub rag_score: Option<u8>,
    pub rag_comment: String,
    pub diagnosis: Option<Diagnosis>,
    pub evidence_score: Option<u8>,
    pub evidence_comment: String,
    pub agent_models: HashMap<String, ModelInfo>,
    pub final_output: Option<FinalOutput>,
}

/// Partial state produced by one stage.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub optimized_symptoms: Option<String>,
    pub rag_keywords: Option<Vec<String>>,
    pub rag_docs: Option<Vec<Document>>,
    pub rag_score: Option<Option<u8>>,
    pub rag_comment: Option<String>,
    pub diagnosis: Option<Diagnosis>,
    pub evidence_score: Option<Option<u8>>,
    pub evidence_comment: Option<String>,
    pub agent_model: Option<(String, ModelInfo)>,
    pub final_output: Option<FinalOutput>,
}

impl StateUpdate {
    pub fn symptoms(mut self, optimized: String, keywords: Vec<String>) -> Self {
        self.optimized_symptoms = Some(optimized);
        self.rag_keywords = Some(keywords);
        self
    }

    pub fn docs(mut self, docs: Vec<Document>) -> Self {
        self.rag_docs = Some(docs);
        self
    }

    pub fn rag_grade(mut self, score: Option<u8>, comment: String) -> Self {
        self.rag_score = Some(score);
        self.rag_comment = Some(comment);
        self
    }

    pub fn diagnosis(mut self, diagnosis: Diagnosis) -> Self {
        self.diagnosis = Some(diagnosis);
        self
    }

    pub fn evidence_grade(mut self, score: Option<u8>, comment: String) -> Self {
        self.evidence_score = Some(score);
        self.evidence_comment = Some(comment);
        self
    }

    pub fn model(mut self, agent: &str, info: ModelInfo) -> Self {
        self.agent_model = Some((agent.to_string(), info));
        self
    }

    pub fn output(mut self, output: FinalOutput) -> Self {
        self.final_output = Some(output);
        self
    }
}

impl PipelineState {
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(v) = update.optimized_symptoms {
            self.optimized_symptoms = v;
        }
        if let Some(v) = update.rag_keywords {
            self.rag_keywords = v;
        }
        if let Some(v) = update.rag_docs {
            self.rag_docs = v;
        }
        if let Some(v) = update.rag_score {
            self.rag_score = v;
        }
        if let Some(v) = update.rag_comment {
            self.rag_comment = v;
        }
        if let Some(v) = update.diagnosis {
            self.diagnosis = Some(v);
        }
        if let Some(v) = update.evidence_score {
            self.evidence_score = v;
        }
        if let Some(v) = update.evidence_comment {
            self.evidence_comment = v;
        }
        if let Some((agent, info)) = update.agent_model {
            self.agent_models.insert(agent, info);
        }
        if let Some(v) = update.final_output {
            self.final_output = Some(v);
        }
    }
}
