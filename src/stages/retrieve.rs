//! Stage 3: knowledge base retrieval.
//!
//! Queries the vector index with the stage-2 keywords. An unconfigured
//! backend, a backend error or an empty hit list all degrade to one
//! synthetic context document so downstream stages always see context.
//! Empty keywords are the one hard error in the pipeline.

use super::{Stage, StageContext, StageId};
use crate::error::PipelineError;
use crate::fallback::mock_document;
use crate::state::{PipelineState, StateUpdate};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct RagRetriever;

#[async_trait]
impl Stage for RagRetriever {
    fn id(&self) -> StageId {
        StageId::RagRetriever
    }

    async fn run(
        &self,
        cx: &StageContext<'_>,
        state: &PipelineState,
    ) -> Result<StateUpdate, PipelineError> {
        if state.rag_keywords.is_empty() {
            return Err(PipelineError::EmptyRetrievalKeywords);
        }

        if !cx.retrieval.is_configured() {
            info!("retrieval backend unconfigured; using synthetic context");
            return Ok(StateUpdate::default().docs(vec![mock_document(&state.optimized_symptoms)]));
        }

        let query = state.rag_keywords.join(" ");
        let corpus = cx
            .intake
            .rag_corpus
            .as_deref()
            .or(cx.config.diagnosis_corpus.as_deref());
        let docs = match cx
            .retrieval
            .fetch(&query, cx.config.retrieval_limit, corpus)
            .await
        {
            Ok(docs) if !docs.is_empty() => docs,
            Ok(_) => {
                info!("no retrieval hits; using synthetic context");
                vec![mock_document(&state.optimized_symptoms)]
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed; using synthetic context");
                vec![mock_document(&state.optimized_symptoms)]
            }
        };

        info!(docs = docs.len(), "retrieval complete");
        Ok(StateUpdate::default().docs(docs))
    }
}
