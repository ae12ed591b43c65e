use serde::{Deserialize, Serialize};

use crate::models::Chat;

// -- JWT Claims --

/// Claims carried by every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub username: String,
    #[serde(rename = "isModerator")]
    pub is_moderator: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
    pub repeat_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub login: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub login: String,
    pub is_moderator: bool,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// -- Chats --

/// Body for creating or updating a catalog entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatInput {
    pub name: String,
    #[serde(default)]
    pub info: String,
    pub nickname: String,
    #[serde(default)]
    pub friends: i64,
    #[serde(default)]
    pub subscribers: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatListResponse {
    pub chats: Vec<Chat>,
    pub draft_id: i64,
    pub draft_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachResponse {
    pub message_id: i64,
    pub chat_id: i64,
    pub attached: bool,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleSoundResponse {
    pub sound: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: i64,
    pub status: crate::MessageStatus,
}
