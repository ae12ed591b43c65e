use axum::{Extension, extract::State, http::StatusCode, response::IntoResponse};

use herald_types::api::{ToggleSoundResponse, UpdateTextRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::Identity;
use crate::workflow::{self, ListParams};

/// GET /messages?status=&start_date=&end_date=
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::list_messages(&state, &identity, &params).await?))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::get_message(&state, &identity, message_id).await?))
}

pub async fn update_text(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
    Json(req): Json<UpdateTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::edit_text(&state, &identity, message_id, req.text).await?))
}

pub async fn form(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::form_message(&state, &identity, message_id).await?))
}

pub async fn finish(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::finish_message(&state, &identity, message_id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::reject_message(&state, &identity, message_id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(workflow::delete_message(&state, &identity, message_id).await?))
}

// ── Message items ───────────────────────────────────────────────────────

/// DELETE /message-chats/{message_id}/{chat_id}
pub async fn detach_chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((message_id, chat_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    workflow::detach_chat(&state, &identity, message_id, chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /message-chats/{message_id}/{chat_id}/sound
pub async fn toggle_sound(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((message_id, chat_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let sound = workflow::toggle_sound(&state, &identity, message_id, chat_id).await?;
    Ok(Json(ToggleSoundResponse { sound }))
}
