use axum::Json;

use crate::api::dto::SetLanguageRequest;
use crate::error::{AppError, Envelope};
use crate::i18n;

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_version() -> Json<Envelope> {
    Envelope::ok(env!("CARGO_PKG_VERSION"))
}

pub async fn get_languages() -> Json<Envelope> {
    Envelope::ok(serde_json::json!({
        "languages": i18n::languages(),
        "current": i18n::language(),
    }))
}

pub async fn set_language(
    axum::extract::State(state): axum::extract::State<crate::api::AppState>,
    Json(req): Json<SetLanguageRequest>,
) -> Result<Json<Envelope>, AppError> {
    if !i18n::set_language(&req.language) {
        return Err(AppError::InvalidRequest(format!(
            "unknown language {}",
            req.language
        )));
    }
    state
        .store
        .write("settings.json", &serde_json::json!({ "language": req.language }))
        .await?;
    Ok(Envelope::ok_msg("language updated"))
}
