use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::api::dto::{
    AddModelRequest, AddSupplierRequest, ModelRefRequest, SetModelStatusRequest,
    SetModelTitleRequest, SetSupplierConfigRequest, SetSupplierStatusRequest, SupplierNameRequest,
};
use crate::api::AppState;
use crate::error::{AppError, Envelope};
use crate::models::supplier::{ModelEntry, Supplier};

pub async fn list_suppliers(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.registry.list_suppliers().await)
}

#[utoipa::path(
    post,
    path = "/model/add_supplier",
    request_body = AddSupplierRequest,
    responses(
        (status = 200, description = "Supplier added", body = Envelope),
        (status = 409, description = "Duplicate name", body = Envelope)
    )
)]
pub async fn add_supplier(
    State(state): State<AppState>,
    Json(req): Json<AddSupplierRequest>,
) -> Result<Json<Envelope>, AppError> {
    let supplier = state
        .registry
        .add_supplier(Supplier {
            supplier_name: req.supplier_name,
            title: req.title,
            base_url: req.base_url,
            api_key: req.api_key,
            enabled: true,
            models: Vec::new(),
        })
        .await?;
    Ok(Envelope::ok(supplier))
}

pub async fn remove_supplier(
    State(state): State<AppState>,
    Json(req): Json<SupplierNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    state.registry.remove_supplier(&req.supplier_name).await?;
    Ok(Envelope::ok_msg("supplier removed"))
}

pub async fn set_supplier_status(
    State(state): State<AppState>,
    Json(req): Json<SetSupplierStatusRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .registry
        .set_supplier_status(&req.supplier_name, req.enabled)
        .await?;
    Ok(Envelope::ok_msg("supplier status updated"))
}

pub async fn get_supplier_config(
    State(state): State<AppState>,
    Json(req): Json<SupplierNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(
        state.registry.get_supplier_config(&req.supplier_name).await?,
    ))
}

pub async fn set_supplier_config(
    State(state): State<AppState>,
    Json(req): Json<SetSupplierConfigRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .registry
        .set_supplier_config(Supplier {
            supplier_name: req.supplier_name,
            title: req.title,
            base_url: req.base_url,
            api_key: req.api_key,
            enabled: true,
            models: Vec::new(),
        })
        .await?;
    Ok(Envelope::ok_msg("supplier config updated"))
}

/// Probe the endpoint with a model listing; reachability only, no side
/// effects.
pub async fn check_supplier_config(
    State(state): State<AppState>,
    Json(req): Json<SupplierNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    let reason = state
        .registry
        .check_supplier_config(&req.supplier_name)
        .await?;
    Ok(Envelope::ok(json!({
        "ok": reason.is_none(),
        "reason": reason,
    })))
}

pub async fn list_models(
    State(state): State<AppState>,
    Json(req): Json<SupplierNameRequest>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(
        state.registry.list_models(&req.supplier_name).await?,
    ))
}

pub async fn add_model(
    State(state): State<AppState>,
    Json(req): Json<AddModelRequest>,
) -> Result<Json<Envelope>, AppError> {
    let title = if req.title.is_empty() {
        req.name.clone()
    } else {
        req.title
    };
    state
        .registry
        .add_model(
            &req.supplier_name,
            ModelEntry {
                name: req.name,
                title,
                parameters: req.parameters,
                capabilities: req.capabilities,
                enabled: true,
            },
        )
        .await?;
    Ok(Envelope::ok_msg("model added"))
}

pub async fn remove_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRefRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .registry
        .remove_model(&req.supplier_name, &req.model)
        .await?;
    Ok(Envelope::ok_msg("model removed"))
}

pub async fn set_model_status(
    State(state): State<AppState>,
    Json(req): Json<SetModelStatusRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .registry
        .set_model_status(&req.supplier_name, &req.model, req.enabled)
        .await?;
    Ok(Envelope::ok_msg("model status updated"))
}

pub async fn set_model_title(
    State(state): State<AppState>,
    Json(req): Json<SetModelTitleRequest>,
) -> Result<Json<Envelope>, AppError> {
    state
        .registry
        .set_model_title(&req.supplier_name, &req.model, &req.title)
        .await?;
    Ok(Envelope::ok_msg("model title updated"))
}

pub async fn list_embedding_models(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.registry.list_embedding_models().await)
}
