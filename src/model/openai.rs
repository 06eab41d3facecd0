//! HTTP clients for OpenAI-compatible chat and embedding endpoints.
//!
//! Local inference servers (vLLM, llama.cpp, Ollama) and the hosted OpenAI
//! API share this wire shape, so one client covers both model types; only
//! the base URL and key differ.

use super::resolver::{ModelFactory, ModelType, ResolvedModelConfig};
use super::{ChatMessage, ChatModel, ChatResponse, ModelError};
use crate::retrieval::{Embedder, RetrievalError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Models that reject a custom temperature and only accept the default.
const NO_CUSTOM_TEMPERATURE_MODELS: [&str; 1] = ["gpt-5-mini"];

pub struct OpenAiChatModel {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl OpenAiChatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let temperature = if NO_CUSTOM_TEMPERATURE_MODELS.contains(&model.as_str()) {
            None
        } else {
            Some(DEFAULT_TEMPERATURE)
        };
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            api_key: None,
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ModelError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ModelError::Unreachable(e.to_string()))?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ModelError::MalformedResponse("no choices in response".to_string()))?;

        Ok(ChatResponse { content })
    }
}

/// Embedding client against an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let mut request = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
    }
}

/// Production factory: builds an HTTP chat client from the resolved
/// configuration. Remote models authenticate with the configured API key.
pub struct HttpModelFactory {
    api_key: Option<String>,
    call_timeout: Duration,
}

impl HttpModelFactory {
    pub fn new(api_key: Option<String>, call_timeout: Duration) -> Self {
        Self {
            api_key,
            call_timeout,
        }
    }
}

const REMOTE_BASE_URL: &str = "https://api.openai.com/v1";

impl ModelFactory for HttpModelFactory {
    fn build(&self, cfg: &ResolvedModelConfig) -> Arc<dyn ChatModel> {
        let base_url = match (&cfg.model_type, &cfg.base_url) {
            (_, Some(url)) => url.clone(),
            (ModelType::Remote, None) => REMOTE_BASE_URL.to_string(),
            (ModelType::Local, None) => "http://localhost:8000/v1".to_string(),
        };
        let mut model =
            OpenAiChatModel::new(base_url, cfg.model_name.clone()).with_timeout(self.call_timeout);
        if cfg.model_type == ModelType::Remote {
            if let Some(key) = &self.api_key {
                model = model.with_api_key(key.clone());
            }
        }
        Arc::new(model)
    }
}
