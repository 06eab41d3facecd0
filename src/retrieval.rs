//! Similarity retrieval behind trait seams.
//!
//! The adapter owns an embedder and a vector index, both optional: an
//! unconfigured adapter reports itself as such and the pipeline substitutes
//! a synthetic context document instead of failing the run.

use crate::types::Document;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("similarity search failed: {0}")]
    Search(String),
}

/// Text to query vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// One raw hit from the index, before snippet shaping.
#[derive(Debug, Clone)]
pub struct SearchRow {
    pub id: String,
    pub score: f64,
    pub content: String,
}

/// Vector similarity search over an optional corpus partition.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        corpus: Option<&str>,
    ) -> Result<Vec<SearchRow>, RetrievalError>;
}

pub struct RetrievalAdapter {
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    snippet_max_chars: usize,
}

impl RetrievalAdapter {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        snippet_max_chars: usize,
    ) -> Self {
        Self {
            embedder: Some(embedder),
            index: Some(index),
            snippet_max_chars,
        }
    }

    /// An adapter with no backend; `is_configured` reports false.
    pub fn disabled() -> Self {
        Self {
            embedder: None,
            index: None,
            snippet_max_chars: 0,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.embedder.is_some() && self.index.is_some()
    }

    /// Embed the query and run a similarity search, shaping hits into
    /// snippet documents. Calling on an unconfigured adapter is an error;
    /// callers check `is_configured` first.
    pub async fn fetch(
        &self,
        query: &str,
        limit: usize,
        corpus: Option<&str>,
    ) -> Result<Vec<Document>, RetrievalError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| RetrievalError::Embedding("no embedder configured".to_string()))?;
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| RetrievalError::Search("no index configured".to_string()))?;

        let vector = embedder.embed(query).await?;
        let rows = index.search(&vector, limit, corpus).await?;
        debug!(hits = rows.len(), corpus = corpus.unwrap_or("default"), "similarity search complete");

        Ok(rows
            .into_iter()
            .map(|row| Document {
                doc_id: row.id,
                score: row.score,
                snippet: truncate_chars(&row.content, self.snippet_max_chars),
            })
            .collect())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// In-memory index for tests and small corpora: brute-force cosine ranking
/// with an optional corpus tag filter.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: Vec<IndexEntry>,
}

struct IndexEntry {
    id: String,
    corpus: Option<String>,
    vector: Vec<f32>,
    content: String,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: impl Into<String>,
        corpus: Option<&str>,
        vector: Vec<f32>,
        content: impl Into<String>,
    ) {
        self.entries.push(IndexEntry {
            id: id.into(),
            corpus: corpus.map(String::from),
            vector,
            content: content.into(),
        });
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        corpus: Option<&str>,
    ) -> Result<Vec<SearchRow>, RetrievalError> {
        let mut scored: Vec<SearchRow> = self
            .entries
            .iter()
            .filter(|e| corpus.is_none() || e.corpus.as_deref() == corpus)
            .map(|e| SearchRow {
                id: e.id.clone(),
                score: cosine_similarity(query, &e.vector) as f64,
                content: e.content.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
