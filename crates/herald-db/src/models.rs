//! Database row types, mapped directly from SQLite rows.
//! Distinct from herald-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use herald_types::MessageStatus;
use herald_types::models::Chat;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub login: String,
    pub password: String,
    pub is_moderator: bool,
}

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: i64,
    pub is_delete: bool,
    pub img: String,
    pub name: String,
    pub info: String,
    pub nickname: String,
    pub friends: i64,
    pub subscribers: i64,
}

impl ChatRow {
    pub fn into_chat(self) -> Chat {
        Chat {
            id: self.id,
            img: self.img,
            name: self.name,
            info: self.info,
            nickname: self.nickname,
            friends: self.friends,
            subscribers: self.subscribers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub status: MessageStatus,
    pub text: String,
    pub date_create: DateTime<Utc>,
    pub date_update: DateTime<Utc>,
    pub date_finish: Option<DateTime<Utc>>,
    pub creator_id: i64,
    pub moderator_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChatRow {
    pub id: i64,
    pub message_id: i64,
    pub chat_id: i64,
    pub sound: bool,
    pub is_read: bool,
}
