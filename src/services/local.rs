//! Client for the managed local runtime's native API: NDJSON chat
//! streaming, embeddings, and the model install endpoints the manager
//! drives.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::services::providers::{
    ChatDelta, ChatMessage, ChatStreamRequest, HttpConfig, ProviderError, UpstreamStats,
};

#[derive(Serialize)]
struct NativeChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct NativeChatLine {
    #[serde(default)]
    message: Option<NativeMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Deserialize)]
struct NativeMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api { status, message })
}

pub async fn chat_stream(
    cfg: &HttpConfig,
    request: &ChatStreamRequest,
    tx: mpsc::Sender<ChatDelta>,
) -> Result<(), ProviderError> {
    let client = Client::new();
    let body = NativeChatRequest {
        model: &request.model,
        messages: &request.messages,
        stream: true,
    };
    let resp = error_for_status(
        client
            .post(format!("{}/api/chat", cfg.base_url))
            .json(&body)
            .send()
            .await?,
    )
    .await?;

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
            if line.is_empty() {
                continue;
            }
            let parsed: NativeChatLine = serde_json::from_str(&line)
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            if let Some(message) = &parsed.message {
                if let Some(thinking) = &message.thinking {
                    if !thinking.is_empty()
                        && tx
                            .send(ChatDelta::Reasoning(thinking.clone()))
                            .await
                            .is_err()
                    {
                        return Ok(());
                    }
                }
                if !message.content.is_empty()
                    && tx
                        .send(ChatDelta::Content(message.content.clone()))
                        .await
                        .is_err()
                {
                    return Ok(());
                }
            }
            if parsed.done {
                let stats = UpstreamStats {
                    prompt_eval_count: parsed.prompt_eval_count,
                    eval_count: parsed.eval_count,
                    total_duration_ms: parsed.total_duration.map(|ns| ns / 1_000_000),
                    eval_duration_ms: parsed.eval_duration.map(|ns| ns / 1_000_000),
                };
                let _ = tx.send(ChatDelta::Done(stats)).await;
                return Ok(());
            }
        }
    }

    let _ = tx.send(ChatDelta::Done(UpstreamStats::default())).await;
    Ok(())
}

#[derive(Serialize)]
struct NativeEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct NativeEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub async fn embed(
    cfg: &HttpConfig,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let client = Client::builder().timeout(cfg.timeout).build()?;
    let resp = error_for_status(
        client
            .post(format!("{}/api/embed", cfg.base_url))
            .json(&NativeEmbedRequest { model, input: texts })
            .send()
            .await?,
    )
    .await?;
    let data: NativeEmbedResponse = resp.json().await?;
    if data.embeddings.len() != texts.len() {
        return Err(ProviderError::Parse(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            data.embeddings.len()
        )));
    }
    Ok(data.embeddings)
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagInfo>,
}

#[derive(Deserialize)]
struct TagInfo {
    name: String,
}

pub async fn list_models(cfg: &HttpConfig) -> Result<Vec<String>, ProviderError> {
    let client = Client::builder().timeout(cfg.timeout).build()?;
    let resp = error_for_status(
        client
            .get(format!("{}/api/tags", cfg.base_url))
            .send()
            .await?,
    )
    .await?;
    let tags: TagsResponse = resp.json().await?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// One progress line of a streaming model pull.
#[derive(Debug, Clone, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

/// Drive the runtime's streaming pull endpoint, reporting each status line.
/// Install jobs have no wall-clock timeout; only the idle timer applies.
pub async fn pull(
    cfg: &HttpConfig,
    tag: &str,
    mut on_event: impl FnMut(PullEvent),
) -> Result<(), ProviderError> {
    let client = Client::new();
    let resp = error_for_status(
        client
            .post(format!("{}/api/pull", cfg.base_url))
            .json(&serde_json::json!({ "model": tag, "stream": true }))
            .send()
            .await?,
    )
    .await?;

    let mut stream = resp.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer = buffer[pos + 1..].to_string();
            if line.is_empty() {
                continue;
            }
            if let Some(detail) = serde_json::from_str::<serde_json::Value>(&line)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            {
                return Err(ProviderError::Api {
                    status: 500,
                    message: detail,
                });
            }
            let event: PullEvent =
                serde_json::from_str(&line).map_err(|e| ProviderError::Parse(e.to_string()))?;
            on_event(event);
        }
    }
    Ok(())
}

pub async fn delete_model(cfg: &HttpConfig, tag: &str) -> Result<(), ProviderError> {
    let client = Client::builder().timeout(cfg.timeout).build()?;
    let resp = client
        .delete(format!("{}/api/delete", cfg.base_url))
        .json(&serde_json::json!({ "model": tag }))
        .send()
        .await?;
    // Deleting an absent artifact is treated as success.
    if resp.status().is_success() || resp.status().as_u16() == 404 {
        Ok(())
    } else {
        error_for_status(resp).await.map(|_| ())
    }
}
