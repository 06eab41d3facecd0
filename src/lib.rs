//! dxflow: a staged differential-diagnosis pipeline over LLM collaborators.
//!
//! Nine fixed stages turn a structured symptom intake into a ranked
//! three-condition diagnosis with drug guidance: normalization, a quality
//! gate with a refine loop, knowledge-base retrieval, relevance grading,
//! diagnosis generation, evidence grading, per-condition drug
//! recommendation, probability review and final shaping.
//!
//! Model calls are wrapped in bounded retries; every stage carries a
//! deterministic fallback, so a run completes even when every model call
//! fails. Only a malformed intake or an empty retrieval keyword list abort
//! a run.
//!
//! # Example
//!
//! ```no_run
//! use dxflow::{
//!     HttpModelFactory, IntakeRecord, ModelProfiles, ModelResolver, Pipeline, PipelineConfig,
//!     ResolverConfig, RetrievalAdapter,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let factory = Arc::new(HttpModelFactory::new(None, config.call_timeout));
//! let resolver = ModelResolver::new(ModelProfiles::default(), ResolverConfig::default(), factory);
//! let pipeline = Pipeline::new(resolver, RetrievalAdapter::disabled(), config);
//!
//! let intake: IntakeRecord = serde_json::from_str(r#"{
//!     "body_part": "头部",
//!     "symptom_names": ["头痛", "发热"],
//!     "severity": 3,
//!     "duration": "1To3Days"
//! }"#)?;
//! let output = pipeline.run(&intake).await?;
//! println!("{}", serde_json::to_string_pretty(&output)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fallback;
pub mod intake;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retrieval;
pub mod retry;
pub mod stages;
pub mod state;
pub mod types;

pub use config::{
    AgentModelConfig, ModelProfile, ModelProfiles, PipelineConfig, ResolverConfig, DEFAULT_PROFILE,
};
pub use error::PipelineError;
pub use intake::{DurationBucket, IntakeRecord};
pub use model::{
    ChatMessage, ChatModel, ChatResponse, HttpModelFactory, ModelError, ModelFactory,
    ModelResolver, ModelType, OpenAiChatModel, OpenAiEmbedder, ResolvedModel, ResolvedModelConfig,
    Role, ScriptedModel,
};
pub use pipeline::{Pipeline, PreprocessPreview};
pub use progress::{ProgressEvent, StageSummary};
pub use retrieval::{Embedder, InMemoryIndex, RetrievalAdapter, RetrievalError, VectorIndex};
pub use stages::{Stage, StageContext, StageId};
pub use state::{PipelineState, StateUpdate};
pub use types::{
    Diagnosis, DiagnosisCandidate, Document, DrugEntry, FinalOutput, ModelInfo, RecommendedDrug,
};
