use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::models::supplier::Supplier;
use crate::services::{local, openai};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatStreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Statistics reported by the upstream at end-of-stream; surfaced to the UI
/// through the turn's `stat` map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpstreamStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_duration_ms: Option<u64>,
}

/// One event on an upstream chat stream. Reasoning deltas arrive before
/// content deltas for models that emit a thinking prefix.
#[derive(Debug)]
pub enum ChatDelta {
    Reasoning(String),
    Content(String),
    Done(UpstreamStats),
    Error(ProviderError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("upstream timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Parse(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => AppError::UpstreamTimeout,
            ProviderError::Http(e) if e.is_timeout() => AppError::UpstreamTimeout,
            other => AppError::UpstreamFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Dispatch to the supplier's wire format: OpenAI-compatible
/// `chat/completions` for third parties, the managed runtime's native API
/// for the local supplier.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAiCompatible(HttpConfig),
    Local(HttpConfig),
}

impl Provider {
    pub fn for_supplier(supplier: &Supplier, timeout: Duration) -> Self {
        let cfg = HttpConfig {
            base_url: supplier.base_url.trim_end_matches('/').to_string(),
            api_key: supplier.api_key.clone(),
            timeout,
        };
        if supplier.is_local() {
            Provider::Local(cfg)
        } else {
            Provider::OpenAiCompatible(cfg)
        }
    }

    pub async fn chat_stream(
        &self,
        request: &ChatStreamRequest,
        tx: mpsc::Sender<ChatDelta>,
    ) -> Result<(), ProviderError> {
        match self {
            Provider::OpenAiCompatible(cfg) => openai::chat_stream(cfg, request, tx).await,
            Provider::Local(cfg) => local::chat_stream(cfg, request, tx).await,
        }
    }

    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Provider::OpenAiCompatible(cfg) => openai::embed(cfg, model, texts).await,
            Provider::Local(cfg) => local::embed(cfg, model, texts).await,
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        match self {
            Provider::OpenAiCompatible(cfg) => openai::list_models(cfg).await,
            Provider::Local(cfg) => local::list_models(cfg).await,
        }
    }

    /// Minimal protocol probe used by `check_supplier_config`; no side
    /// effects.
    pub async fn probe(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }
}
