//! OpenAI-compatible HTTP client: streaming chat completions and embeddings.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::services::providers::{
    ChatDelta, ChatMessage, ChatStreamRequest, HttpConfig, ProviderError, UpstreamStats,
};

#[derive(Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

fn authorized(cfg: &HttpConfig, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    if cfg.api_key.is_empty() {
        req
    } else {
        req.header("Authorization", format!("Bearer {}", cfg.api_key))
    }
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api { status, message })
}

/// Stream a chat completion, pushing deltas as they arrive. The idle timer
/// between deltas is `cfg.timeout`; reasoning deltas precede content deltas.
pub async fn chat_stream(
    cfg: &HttpConfig,
    request: &ChatStreamRequest,
    tx: mpsc::Sender<ChatDelta>,
) -> Result<(), ProviderError> {
    let client = Client::new();
    let body = CompletionsRequest {
        model: &request.model,
        messages: &request.messages,
        stream: true,
    };

    let req = authorized(
        cfg,
        client
            .post(format!("{}/chat/completions", cfg.base_url))
            .json(&body),
    );
    let resp = error_for_status(req.send().await?).await?;

    let mut stats = UpstreamStats::default();
    let mut stream = resp.bytes_stream();
    let mut buffer = String::new();

    loop {
        let chunk = match timeout(cfg.timeout, stream.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => return Err(ProviderError::Timeout),
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer = buffer[pos + 1..].to_string();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                let _ = tx.send(ChatDelta::Done(stats)).await;
                return Ok(());
            }
            let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) else {
                continue;
            };
            if let Some(usage) = parsed.usage {
                stats.prompt_eval_count = usage.prompt_tokens;
                stats.eval_count = usage.completion_tokens;
            }
            if let Some(choice) = parsed.choices.first() {
                if let Some(reasoning) = &choice.delta.reasoning_content {
                    if !reasoning.is_empty()
                        && tx
                            .send(ChatDelta::Reasoning(reasoning.clone()))
                            .await
                            .is_err()
                    {
                        return Ok(());
                    }
                }
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty()
                        && tx.send(ChatDelta::Content(content.clone())).await.is_err()
                    {
                        return Ok(());
                    }
                }
                if choice.finish_reason.is_some() {
                    let _ = tx.send(ChatDelta::Done(stats)).await;
                    return Ok(());
                }
            }
        }
    }

    let _ = tx.send(ChatDelta::Done(stats)).await;
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub async fn embed(
    cfg: &HttpConfig,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let client = Client::builder().timeout(cfg.timeout).build()?;
    let req = authorized(
        cfg,
        client
            .post(format!("{}/embeddings", cfg.base_url))
            .json(&EmbeddingRequest { model, input: texts }),
    );
    let resp = error_for_status(req.send().await?).await?;
    let data: EmbeddingResponse = resp.json().await?;
    if data.data.len() != texts.len() {
        return Err(ProviderError::Parse(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            data.data.len()
        )));
    }
    Ok(data.data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelData>,
}

#[derive(Deserialize)]
struct ModelData {
    id: String,
}

pub async fn list_models(cfg: &HttpConfig) -> Result<Vec<String>, ProviderError> {
    let client = Client::builder().timeout(cfg.timeout).build()?;
    let req = authorized(cfg, client.get(format!("{}/models", cfg.base_url)));
    let resp = error_for_status(req.send().await?).await?;
    let data: ModelsResponse = resp.json().await?;
    Ok(data.data.into_iter().map(|m| m.id).collect())
}
