//! Pipeline error taxonomy.
//!
//! Only caller contract violations surface as errors: malformed intake and
//! an empty retrieval keyword list. Everything else (unparseable model
//! output, unavailable collaborators, low grades) is recovered inside the
//! stage that observed it via retry, fallback, or substitute behavior.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The intake record failed strict shape validation. Not retried.
    #[error("invalid intake: {0}")]
    InvalidIntake(String),

    /// Retrieval was entered with no keywords. This is a programming
    /// invariant of the stage graph, not a recoverable input condition.
    #[error("rag_keywords is empty; cannot run retrieval")]
    EmptyRetrievalKeywords,
}
