use axum::{
    Extension,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use herald_types::api::{ChatInput, ChatListResponse};
use herald_types::models::Chat;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;
use crate::extract::{Json, Path, Query};
use crate::middleware::{Identity, optional_identity};
use crate::workflow;

/// Largest image accepted for a chat.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub name: Option<String>,
}

fn image_key(chat_id: i64) -> String {
    format!("{}.png", chat_id)
}

fn validate(input: &ChatInput) -> Result<(), ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be blank"));
    }
    if input.nickname.trim().is_empty() {
        return Err(ApiError::validation("nickname must not be blank"));
    }
    if input.friends < 0 || input.subscribers < 0 {
        return Err(ApiError::validation("counters must not be negative"));
    }
    Ok(())
}

// ── Operations ──────────────────────────────────────────────────────────

/// Live chats plus the caller's draft id and item count (zeros when the
/// caller is anonymous or has no draft).
pub async fn list_chats(
    state: &AppStateInner,
    identity: Option<&Identity>,
    name: Option<String>,
) -> Result<ChatListResponse, ApiError> {
    let user_id = identity.map(|i| i.user_id);
    let (chats, draft) = state
        .run_db(move |db| {
            let chats = db.list_chats(name.as_deref())?;
            let draft = match user_id {
                Some(id) => db.draft_summary(id)?,
                None => Default::default(),
            };
            Ok((chats, draft))
        })
        .await?;

    Ok(ChatListResponse {
        chats,
        draft_id: draft.draft_id,
        draft_count: draft.item_count,
    })
}

pub async fn get_chat(state: &AppStateInner, chat_id: i64) -> Result<Chat, ApiError> {
    state
        .run_db(move |db| Ok(db.get_chat(chat_id)?))
        .await?
        .ok_or(ApiError::NotFound("chat not found"))
}

pub async fn create_chat(state: &AppStateInner, input: ChatInput) -> Result<Chat, ApiError> {
    validate(&input)?;
    let chat = state.run_db(move |db| Ok(db.create_chat(&input)?)).await?;
    info!("Created chat {} ({})", chat.id, chat.name);
    Ok(chat)
}

pub async fn update_chat(
    state: &AppStateInner,
    chat_id: i64,
    input: ChatInput,
) -> Result<Chat, ApiError> {
    validate(&input)?;
    state
        .run_db(move |db| Ok(db.update_chat(chat_id, &input)?))
        .await?
        .ok_or(ApiError::NotFound("chat not found"))
}

/// Removes the chat's image, then hides the chat. Messages that already
/// reference it keep their rows.
pub async fn delete_chat(state: &AppStateInner, chat_id: i64) -> Result<(), ApiError> {
    get_chat(state, chat_id).await?;
    state
        .within_deadline(state.blobs.remove(&image_key(chat_id)))
        .await?;
    let deleted = state
        .run_db(move |db| Ok(db.soft_delete_chat(chat_id)?))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound("chat not found"));
    }
    info!("Deleted chat {}", chat_id);
    Ok(())
}

/// Stores a new image for the chat and points the chat at its public URL.
pub async fn replace_chat_image(
    state: &AppStateInner,
    chat_id: i64,
    content_type: &str,
    bytes: Bytes,
) -> Result<Chat, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::validation("image body is empty"));
    }
    if !content_type.starts_with("image/") {
        return Err(ApiError::validation("content type must be an image"));
    }
    get_chat(state, chat_id).await?;

    let key = image_key(chat_id);
    state
        .within_deadline(state.blobs.put(&key, bytes, content_type))
        .await?;

    let url = format!("{}/{}", state.image_base_url, key);
    let chat = state
        .run_db(move |db| Ok(db.set_chat_image(chat_id, &url)?))
        .await?
        .ok_or_else(|| {
            warn!("Chat {} vanished while its image was stored", chat_id);
            ApiError::NotFound("chat not found")
        })?;
    info!("Replaced image of chat {}", chat_id);
    Ok(chat)
}

// ── Handlers ────────────────────────────────────────────────────────────

pub async fn list_chats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = optional_identity(&state, &headers).await;
    let resp = list_chats(&state, identity.as_ref(), query.name).await?;
    Ok(Json(resp))
}

pub async fn get_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(get_chat(&state, chat_id).await?))
}

pub async fn create_chat_handler(
    State(state): State<AppState>,
    Json(input): Json<ChatInput>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = create_chat(&state, input).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn update_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Json(input): Json<ChatInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(update_chat(&state, chat_id, input).await?))
}

pub async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    delete_chat(&state, chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /chats/{id}/new-image with the raw image bytes as the body.
pub async fn new_image_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    Ok(Json(replace_chat_image(&state, chat_id, content_type, body).await?))
}

/// POST /chats/{id}/in-message
pub async fn attach_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = workflow::attach_chat(&state, &identity, chat_id).await?;
    let status = if resp.attached {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(resp)))
}
