use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MessageStatus;

/// A catalog contact. Soft-deleted chats never leave the store as a `Chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub img: String,
    pub name: String,
    pub info: String,
    pub nickname: String,
    pub friends: i64,
    pub subscribers: i64,
}

/// The caller's current cart. Both fields are zero when there is no draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub draft_id: i64,
    pub item_count: i64,
}

/// A chat as attached to a message, with the per-item flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedChat {
    #[serde(flatten)]
    pub chat: Chat,
    pub sound: bool,
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: i64,
    pub status: MessageStatus,
    pub text: String,
    pub date_create: DateTime<Utc>,
    pub date_update: DateTime<Utc>,
    pub date_finish: Option<DateTime<Utc>>,
    pub creator: String,
    pub moderator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub chats: Vec<AttachedChat>,
}
