//! Chat model client — the generative collaborator behind every
//! model-backed stage.
//!
//! Defines the client trait and message types. Two implementations:
//! - `OpenAiChatModel`: HTTP calls against an OpenAI-compatible endpoint
//! - `ScriptedModel`: returns preconfigured responses (testing)
//!
//! The engine treats any non-parseable response content as a soft failure;
//! transport errors and timeouts are handled identically by the retry
//! wrapper.

mod openai;
mod resolver;

pub use openai::{HttpModelFactory, OpenAiChatModel, OpenAiEmbedder};
pub use resolver::{ModelFactory, ModelResolver, ModelType, ResolvedModel, ResolvedModelConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
}

/// Errors from model client operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("model returned malformed payload: {0}")]
    MalformedResponse(String),
}

/// Client trait for chat completions.
///
/// Abstracts over transport (HTTP, mock) so stages don't depend on how the
/// model is reached.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelError>;
}

/// Scripted model for testing — pops preconfigured responses in order.
///
/// When the queue is exhausted it repeats the configured steady response,
/// or errors when none was given.
pub struct ScriptedModel {
    queue: Mutex<VecDeque<String>>,
    steady: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Respond with each script entry once, then error.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(String::from).collect()),
            steady: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Respond with the same text on every call.
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            steady: Some(response.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Respond with the script first, then the steady text forever.
    pub fn then_always(responses: Vec<&str>, steady: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(String::from).collect()),
            steady: Some(steady.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `invoke` was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self.queue.lock().unwrap().pop_front();
        match next.or_else(|| self.steady.clone()) {
            Some(content) => Ok(ChatResponse { content }),
            None => Err(ModelError::Unreachable("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_pops_in_order_then_errors() {
        let model = ScriptedModel::new(vec!["one", "two"]);
        assert_eq!(model.invoke(&[]).await.unwrap().content, "one");
        assert_eq!(model.invoke(&[]).await.unwrap().content, "two");
        assert!(matches!(
            model.invoke(&[]).await,
            Err(ModelError::Unreachable(_))
        ));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn scripted_model_steady_response_repeats() {
        let model = ScriptedModel::always("not json");
        for _ in 0..5 {
            assert_eq!(model.invoke(&[]).await.unwrap().content, "not json");
        }
        assert_eq!(model.call_count(), 5);
    }

    #[tokio::test]
    async fn scripted_model_script_then_steady() {
        let model = ScriptedModel::then_always(vec!["first"], "rest");
        assert_eq!(model.invoke(&[]).await.unwrap().content, "first");
        assert_eq!(model.invoke(&[]).await.unwrap().content, "rest");
        assert_eq!(model.invoke(&[]).await.unwrap().content, "rest");
    }
}
