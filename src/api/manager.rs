use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::api::dto::{InstallManagerRequest, InstallModelRequest};
use crate::api::AppState;
use crate::error::{AppError, Envelope};

/// Kick off (or report) a model install. Non-blocking; clients poll
/// `get_model_install_progress` at 1 Hz.
pub async fn install_model(
    State(state): State<AppState>,
    Json(req): Json<InstallModelRequest>,
) -> Json<Envelope> {
    Envelope::ok(state.manager.install_model(&req.name, &req.parameters).await)
}

pub async fn get_model_install_progress(
    State(state): State<AppState>,
    Json(req): Json<InstallModelRequest>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(
        state
            .manager
            .get_model_install_progress(&req.name, &req.parameters)?,
    ))
}

pub async fn remove_model(
    State(state): State<AppState>,
    Json(req): Json<InstallModelRequest>,
) -> Result<Json<Envelope>, AppError> {
    state.manager.remove_model(&req.name, &req.parameters).await?;
    Ok(Envelope::ok_msg("model removed"))
}

pub async fn list_installed_models(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.manager.list_installed_models().await)
}

pub async fn list_visible_models(State(state): State<AppState>) -> Json<Envelope> {
    Envelope::ok(state.manager.list_visible_models())
}

pub async fn install_model_manager(
    State(state): State<AppState>,
    Json(req): Json<InstallManagerRequest>,
) -> Json<Envelope> {
    Envelope::ok(state.manager.install_model_manager(&req.manager_name).await)
}

pub async fn get_model_manager_install_progress(
    State(state): State<AppState>,
) -> Result<Json<Envelope>, AppError> {
    Ok(Envelope::ok(
        state.manager.get_model_manager_install_progress()?,
    ))
}

pub async fn reconnect_model_download(State(state): State<AppState>) -> Json<Envelope> {
    let mirror = state.manager.reconnect_model_download();
    Envelope::ok(json!({ "mirror": mirror }))
}
