use axum::extract::{Query, State};
use axum::Json;

use crate::api::dto::{
    DocContentQuery, RagConfigRequest, RagNameRequest, RemoveDocQuery, UploadDocRequest,
};
use crate::api::AppState;
use crate::error::{AppError, Envelope};

#[utoipa::path(
    post,
    path = "/rag/create_rag",
    request_body = RagConfigRequest,
    responses(
        (status = 200, description = "Knowledge base created", body = Envelope),
        (status = 409, description = "Duplicate name", body = Envelope)
    )
)]
pub async fn create_rag(
    State(state): State<AppState>,
    Json(req): Json<RagConfigRequest>,
) -> Result<Json<Envelope>, AppError> {
    let base = state
        .rag
        .create_rag(&req.name, &req.description, &req.supplier_name, &req.model)
        .await?;
    Ok(Envelope::ok(base))
}

pub async fn modify_rag(
    State(state): State<AppState>,
    Json(req): Json<RagConfigRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .rag
        .modify_rag(&req.name, &req.description, &req.supplier_name, &req.model)
        .await?;
    Ok(Envelope::ok_msg("knowledge base updated"))
}

pub async fn remove_rag(
    State(state): State<AppState>,
    Json(req): Json<RagNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    state.rag.remove_rag(&req.name).await?;
    Ok(Envelope::ok_msg("knowledge base removed"))
}

pub async fn list_rag(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.rag.list_rag().await)
}

/// Upload documents for ingestion. The returned records are already visible
/// to `list_docs` as `pending`; a background worker advances them.
pub async fn upload_doc(
    State(state): State<AppState>,
    Json(req): Json<UploadDocRequest>,
) -> Result<Json<Envelope>, AppError> {
    let docs = state.rag.upload_doc(&req.name, &req.paths).await?;
    Ok(Envelope::ok(docs))
}

pub async fn list_docs(
    State(state): State<AppState>,
    Json(req): Json<RagNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(state.rag.list_docs(&req.name).await?))
}

pub async fn get_doc_content(
    State(state): State<AppState>,
    Query(query): Query<DocContentQuery>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(
        state.rag.get_doc_content(&query.name, query.doc_id).await?,
    ))
}

pub async fn remove_doc(
    State(state): State<AppState>,
    Query(query): Query<RemoveDocQuery>,
) -> Result<Json<Envelope>, AppError> {
    let ids = query.ids()?;
    state.rag.remove_doc(&query.name, &ids).await?;
    Ok(Envelope::ok_msg("documents removed"))
}
