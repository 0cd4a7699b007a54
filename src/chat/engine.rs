use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::store::ChatStore;
use crate::error::AppError;
use crate::i18n;
use crate::models::chat::{SearchHit, TurnEntry};
use crate::rag::RagService;
use crate::registry::SupplierRegistry;
use crate::services::providers::{
    ChatDelta, ChatMessage, ChatStreamRequest, Provider, UpstreamStats,
};
use crate::services::WebSearch;

#[derive(Clone)]
pub struct ChatSettings {
    pub context_length: usize,
    pub upstream_timeout: Duration,
}

/// A chat send, already decoded from the wire.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub model: String,
    pub parameters: String,
    pub context_id: String,
    pub supplier_name: String,
    pub search: String,
    pub rag_list: Vec<String>,
    pub temp_chat: bool,
    pub user_content: String,
    pub doc_files: Vec<String>,
    pub images: Vec<String>,
    pub regenerate_id: Option<Uuid>,
}

/// The conversation id (known before the first delta) and the channel of
/// text chunks feeding the response body.
pub struct SendOutcome {
    pub context_id: String,
    pub rx: mpsc::Receiver<String>,
}

struct Inflight {
    token: Uuid,
    cancel: watch::Sender<bool>,
}

enum StreamEnd {
    Completed(UpstreamStats),
    Interrupted,
}

/// Streaming chat engine: context assembly, augmentation, upstream
/// streaming, and persistence on completion or abort. Persistence happens
/// server-side, so a client that closes the tab still gets its turn saved.
pub struct ChatEngine {
    chats: Arc<ChatStore>,
    registry: Arc<SupplierRegistry>,
    rag: Arc<RagService>,
    search: Arc<dyn WebSearch>,
    inflight: Arc<Mutex<HashMap<String, Inflight>>>,
    settings: ChatSettings,
}

impl ChatEngine {
    pub fn new(
        chats: Arc<ChatStore>,
        registry: Arc<SupplierRegistry>,
        rag: Arc<RagService>,
        search: Arc<dyn WebSearch>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            chats,
            registry,
            rag,
            search,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Validate and launch a streaming turn. Failures surface here, before
    /// any byte is written; an empty `context_id` creates the conversation
    /// implicitly with the user content as its title.
    pub async fn send(&self, req: SendRequest) -> Result<SendOutcome, AppError> {
        if req.user_content.is_empty() {
            return Err(AppError::InvalidRequest("user_content is required".into()));
        }

        let (supplier, model_entry) = self
            .registry
            .resolve(&req.supplier_name, &req.model)
            .await?;

        let config = if req.context_id.is_empty() {
            self.chats
                .create(
                    &req.user_content,
                    &req.model,
                    &req.parameters,
                    &req.supplier_name,
                )
                .await?
        } else {
            self.chats.get(&req.context_id).await?
        };
        let context_id = config.context_id.clone();

        let mut history = self.chats.history(&context_id).await?;
        if let Some(rid) = req.regenerate_id {
            let pos = history
                .iter()
                .position(|e| e.id == rid)
                .ok_or_else(|| AppError::NotFound(format!("history entry {}", rid)))?;
            history.truncate(pos);
        }

        let mut search_hits: Vec<SearchHit> = Vec::new();
        if !req.search.is_empty() {
            match self.search.search(&req.user_content).await {
                Ok(hits) => search_hits = hits,
                Err(e) => warn!("web search failed, continuing without it: {}", e),
            }
        }

        let mut messages: Vec<ChatMessage> = Vec::new();
        if !req.rag_list.is_empty() {
            let snippets = self.rag.retrieve(&req.rag_list, &req.user_content).await?;
            if !snippets.is_empty() {
                messages.push(ChatMessage {
                    role: "system".to_string(),
                    content: RagService::format_preamble(&snippets),
                });
            }
        }
        if !search_hits.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: format_search_preamble(&search_hits),
            });
        }
        messages.extend(ChatStore::assemble_context(
            &history,
            &req.user_content,
            self.settings.context_length,
        ));

        let provider = Provider::for_supplier(&supplier, self.settings.upstream_timeout);
        let model_name = if supplier.is_local() {
            model_entry.artifact_tag()
        } else {
            model_entry.name.clone()
        };
        let upstream_request = ChatStreamRequest {
            model: model_name,
            messages,
        };

        // Cancel-and-replace: a second send on the same conversation
        // finalises the first before its own stream starts filling.
        let token = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut inflight = self.inflight.lock().await;
            if let Some(previous) = inflight.insert(
                context_id.clone(),
                Inflight {
                    token,
                    cancel: cancel_tx,
                },
            ) {
                let _ = previous.cancel.send(true);
            }
        }

        let (client_tx, client_rx) = mpsc::channel::<String>(64);
        let pump = StreamPump {
            chats: self.chats.clone(),
            inflight: self.inflight.clone(),
            context_id: context_id.clone(),
            token,
            req,
            search_hits,
        };
        tokio::spawn(pump.run(provider, upstream_request, cancel_rx, client_tx));

        Ok(SendOutcome {
            context_id,
            rx: client_rx,
        })
    }

    /// Cancel the in-flight stream of a conversation. Idempotent: with
    /// nothing in flight this is a successful no-op.
    pub async fn stop_generate(&self, context_id: &str) {
        let inflight = self.inflight.lock().await;
        if let Some(flight) = inflight.get(context_id) {
            let _ = flight.cancel.send(true);
            info!("stop requested for conversation {}", context_id);
        }
    }
}

fn format_search_preamble(hits: &[SearchHit]) -> String {
    let mut out = String::from("Web search results for the user's question:\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {}: {} ({})\n",
            i + 1,
            hit.title,
            hit.snippet,
            hit.url
        ));
    }
    out
}

/// Owns one streaming turn: pipes upstream deltas to the client while
/// buffering, then persists the pair whatever way the stream ended.
struct StreamPump {
    chats: Arc<ChatStore>,
    inflight: Arc<Mutex<HashMap<String, Inflight>>>,
    context_id: String,
    token: Uuid,
    req: SendRequest,
    search_hits: Vec<SearchHit>,
}

impl StreamPump {
    async fn run(
        self,
        provider: Provider,
        upstream_request: ChatStreamRequest,
        mut cancel_rx: watch::Receiver<bool>,
        client_tx: mpsc::Sender<String>,
    ) {
        let (delta_tx, mut delta_rx) = mpsc::channel::<ChatDelta>(64);
        let upstream = tokio::spawn(async move {
            if let Err(e) = provider.chat_stream(&upstream_request, delta_tx.clone()).await {
                let _ = delta_tx.send(ChatDelta::Error(e)).await;
            }
        });

        let mut reasoning = String::new();
        let mut content = String::new();
        let end;

        loop {
            tokio::select! {
                delta = delta_rx.recv() => match delta {
                    Some(ChatDelta::Reasoning(text)) => {
                        reasoning.push_str(&text);
                        if client_tx.send(text).await.is_err() {
                            // Client disconnect behaves like stop_generate.
                            end = StreamEnd::Interrupted;
                            break;
                        }
                    }
                    Some(ChatDelta::Content(text)) => {
                        content.push_str(&text);
                        if client_tx.send(text).await.is_err() {
                            end = StreamEnd::Interrupted;
                            break;
                        }
                    }
                    Some(ChatDelta::Done(stats)) => {
                        end = StreamEnd::Completed(stats);
                        break;
                    }
                    Some(ChatDelta::Error(e)) => {
                        warn!("upstream failed mid-stream for {}: {}", self.context_id, e);
                        end = StreamEnd::Interrupted;
                        break;
                    }
                    None => {
                        end = StreamEnd::Interrupted;
                        break;
                    }
                },
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        end = StreamEnd::Interrupted;
                        break;
                    }
                }
            }
        }
        upstream.abort();

        let interrupted = matches!(end, StreamEnd::Interrupted);
        if interrupted {
            let marker = i18n::phrase("chat.interrupted");
            content.push_str(&marker);
            // Trailing marker on the wire, best effort.
            let _ = client_tx.send(marker).await;
        }

        if !self.req.temp_chat {
            self.persist(reasoning, content, end).await;
        }

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(&self.context_id)
            .map(|f| f.token == self.token)
            .unwrap_or(false)
        {
            inflight.remove(&self.context_id);
        }
    }

    async fn persist(&self, reasoning: String, content: String, end: StreamEnd) {
        let mut user = TurnEntry::user(&self.req.user_content);
        user.doc_files = self.req.doc_files.clone();
        user.images = self.req.images.clone();

        let mut assistant = TurnEntry::assistant(&content);
        if !reasoning.is_empty() {
            assistant.reasoning = Some(reasoning);
        }
        assistant.stat = match end {
            StreamEnd::Completed(stats) => json!(stats),
            StreamEnd::Interrupted => json!({ "interrupted": true }),
        };
        if !self.req.search.is_empty() {
            assistant.search_result = self.search_hits.clone();
            assistant.search_type = self.req.search.clone();
            assistant.search_query = self.req.user_content.clone();
        }

        if let Err(e) = self
            .chats
            .append_turn(&self.context_id, user, assistant, self.req.regenerate_id)
            .await
        {
            warn!("failed to persist turn for {}: {}", self.context_id, e);
        }
    }
}
