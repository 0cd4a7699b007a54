use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use crate::api::dto::{ChatRequest, ContextIdRequest, CreateChatRequest, ModifyTitleRequest};
use crate::api::AppState;
use crate::error::{AppError, Envelope};

pub async fn get_chat_list(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.chats.list().await)
}

#[utoipa::path(
    post,
    path = "/chat/create_chat",
    request_body = CreateChatRequest,
    responses((status = 200, description = "Conversation created", body = Envelope))
)]
pub async fn create_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<Envelope>, AppError> {
    let config = state
        .chats
        .create(&req.title, &req.model, &req.parameters, &req.supplier_name)
        .await?;
    Ok(Envelope::ok(config))
}

#[utoipa::path(
    post,
    path = "/chat/get_chat_info",
    request_body = ContextIdRequest,
    responses(
        (status = 200, description = "Conversation config and history", body = Envelope),
        (status = 404, description = "Unknown conversation", body = Envelope)
    )
)]
pub async fn get_chat_info(
    State(state): State<AppState>,
    Json(req): Json<ContextIdRequest>,
) -> Result<Json<Envelope>, AppError> {
    let config = state.chats.get(&req.context_id).await?;
    let history = state.chats.history(&req.context_id).await?;
    Ok(Envelope::ok(json!({
        "config": config,
        "history": history,
    })))
}

pub async fn get_last_chat_history(State(state): State<AppState>) -> Json<Envelope> {
    match state.chats.latest().await {
        Some((config, history)) => Envelope::ok(json!({
            "context_id": config.context_id,
            "config": config,
            "history": history,
        })),
        None => Envelope::ok(serde_json::Value::Null),
    }
}

pub async fn remove_chat(
    State(state): State<AppState>,
    Json(req): Json<ContextIdRequest>,
) -> Result<Json<Envelope>, AppError> {
    state.chats.remove(&req.context_id).await?;
    Ok(Envelope::ok_msg("conversation removed"))
}

pub async fn modify_chat_title(
    State(state): State<AppState>,
    Json(req): Json<ModifyTitleRequest>,
) -> Result<Json<Envelope>, AppError> {
    state.chats.modify_title(&req.context_id, &req.title).await?;
    Ok(Envelope::ok_msg("title updated"))
}

/// Stop the in-flight stream of a conversation; calling it with nothing in
/// flight is a successful no-op.
pub async fn stop_generate(
    State(state): State<AppState>,
    Json(req): Json<ContextIdRequest>,
) -> Json<Envelope> {
    state.engine.stop_generate(&req.context_id).await;
    Envelope::ok_msg("stopped")
}

pub async fn get_model_list(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.registry.list_chat_models().await)
}

/// The streaming endpoint: a chunked `text/plain` body of assistant tokens,
/// with the conversation id in `X-Context-Id` before the first delta.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let outcome = state.engine.send(req.into_send_request()?).await?;

    let stream = futures::stream::unfold(outcome.rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, std::convert::Infallible>(Bytes::from(chunk)), rx))
    });

    axum::http::Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("X-Context-Id", outcome.context_id)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}
