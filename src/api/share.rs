use axum::extract::State;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::api::dto::{CreateShareRequest, GetShareRequest};
use crate::api::AppState;
use crate::error::{AppError, Envelope};

fn share_path(share_id: &str) -> String {
    format!("share/{}.json", share_id)
}

/// Snapshot a conversation for sharing. The snapshot is immutable; later
/// turns do not appear in it.
pub async fn create_share(
    State(state): State<AppState>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<Envelope>, AppError> {
    let config = state.chats.get(&req.context_id).await?;
    let history = state.chats.history(&req.context_id).await?;
    let share_id = Uuid::new_v4().to_string();

    state
        .store
        .write(
            &share_path(&share_id),
            &json!({
                "share_id": share_id,
                "config": config,
                "history": history,
                "create_time": chrono::Utc::now().timestamp(),
            }),
        )
        .await?;
    Ok(Envelope::ok(json!({ "share_id": share_id })))
}

pub async fn get_share(
    State(state): State<AppState>,
    Json(req): Json<GetShareRequest>,
) -> Result<Json<Envelope>, AppError> {
    let snapshot = state.store.read(&share_path(&req.share_id)).await;
    if snapshot.is_null() {
        return Err(AppError::NotFound(format!("share {}", req.share_id)));
    }
    Ok(Envelope::ok(snapshot))
}
