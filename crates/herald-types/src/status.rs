use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a message. `Draft` is the only initial state;
/// `Finished`, `Rejected` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Draft,
    Formed,
    Finished,
    Rejected,
    Deleted,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::Draft,
        MessageStatus::Formed,
        MessageStatus::Finished,
        MessageStatus::Rejected,
        MessageStatus::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Formed => "formed",
            Self::Finished => "finished",
            Self::Rejected => "rejected",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// -- Guards --

/// How a refused transition is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardClass {
    Forbidden,
    BadRequest,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("only the creator can form this message")]
    NotCreator,
    #[error("message is already formed")]
    AlreadyFormed,
    #[error("message is finished")]
    Finished,
    #[error("message is rejected")]
    Rejected,
    #[error("message is already deleted")]
    AlreadyDeleted,
    #[error("message text must not be empty")]
    EmptyText,
}

impl FormError {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotCreator => "not_creator",
            Self::AlreadyFormed => "already_formed",
            Self::Finished => "finished",
            Self::Rejected => "rejected",
            Self::AlreadyDeleted => "already_deleted",
            Self::EmptyText => "empty_text",
        }
    }

    pub fn class(self) -> GuardClass {
        match self {
            Self::NotCreator => GuardClass::Forbidden,
            Self::EmptyText => GuardClass::BadRequest,
            _ => GuardClass::Conflict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FinishError {
    #[error("message is already finished")]
    AlreadyFinished,
    #[error("message is not formed yet and cannot be finished")]
    NotYetFormed,
    #[error("message is deleted")]
    Deleted,
    #[error("message is already rejected")]
    AlreadyRejected,
}

impl FinishError {
    pub fn code(self) -> &'static str {
        match self {
            Self::AlreadyFinished => "already_finished",
            Self::NotYetFormed => "not_yet_formed",
            Self::Deleted => "deleted",
            Self::AlreadyRejected => "already_rejected",
        }
    }

    pub fn class(self) -> GuardClass {
        GuardClass::Conflict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectError {
    #[error("message is already rejected")]
    AlreadyRejected,
    #[error("message is not formed yet and cannot be rejected")]
    NotYetFormed,
    #[error("message is deleted")]
    Deleted,
    #[error("message is already finished")]
    AlreadyFinished,
}

impl RejectError {
    pub fn code(self) -> &'static str {
        match self {
            Self::AlreadyRejected => "already_rejected",
            Self::NotYetFormed => "not_yet_formed",
            Self::Deleted => "deleted",
            Self::AlreadyFinished => "already_finished",
        }
    }

    pub fn class(self) -> GuardClass {
        GuardClass::Conflict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeleteError {
    #[error("only the creator can delete this message")]
    NotCreator,
    #[error("message is already deleted")]
    AlreadyDeleted,
    #[error("message is finished")]
    Finished,
    #[error("message is rejected")]
    Rejected,
    #[error("message is already formed")]
    AlreadyFormed,
}

impl DeleteError {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotCreator => "not_creator",
            Self::AlreadyDeleted => "already_deleted",
            Self::Finished => "finished",
            Self::Rejected => "rejected",
            Self::AlreadyFormed => "already_formed",
        }
    }

    pub fn class(self) -> GuardClass {
        match self {
            Self::NotCreator => GuardClass::Forbidden,
            _ => GuardClass::Conflict,
        }
    }
}

/// Refusals for edits that only a draft accepts: text changes,
/// detaching a chat, toggling an item's sound flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DraftEditError {
    #[error("only the creator can change this message")]
    NotCreator,
    #[error("message is {0} and can no longer be changed")]
    NotDraft(MessageStatus),
}

impl DraftEditError {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotCreator => "not_creator",
            Self::NotDraft(_) => "not_draft",
        }
    }

    pub fn class(self) -> GuardClass {
        match self {
            Self::NotCreator => GuardClass::Forbidden,
            Self::NotDraft(_) => GuardClass::Conflict,
        }
    }
}

/// Creator first, then status, then text.
pub fn check_form(
    status: MessageStatus,
    creator_id: i64,
    actor_id: i64,
    text: &str,
) -> Result<(), FormError> {
    if creator_id != actor_id {
        return Err(FormError::NotCreator);
    }
    match status {
        MessageStatus::Draft => {}
        MessageStatus::Formed => return Err(FormError::AlreadyFormed),
        MessageStatus::Finished => return Err(FormError::Finished),
        MessageStatus::Rejected => return Err(FormError::Rejected),
        MessageStatus::Deleted => return Err(FormError::AlreadyDeleted),
    }
    if text.trim().is_empty() {
        return Err(FormError::EmptyText);
    }
    Ok(())
}

pub fn check_finish(status: MessageStatus) -> Result<(), FinishError> {
    match status {
        MessageStatus::Formed => Ok(()),
        MessageStatus::Finished => Err(FinishError::AlreadyFinished),
        MessageStatus::Draft => Err(FinishError::NotYetFormed),
        MessageStatus::Deleted => Err(FinishError::Deleted),
        MessageStatus::Rejected => Err(FinishError::AlreadyRejected),
    }
}

pub fn check_reject(status: MessageStatus) -> Result<(), RejectError> {
    match status {
        MessageStatus::Formed => Ok(()),
        MessageStatus::Rejected => Err(RejectError::AlreadyRejected),
        MessageStatus::Draft => Err(RejectError::NotYetFormed),
        MessageStatus::Deleted => Err(RejectError::Deleted),
        MessageStatus::Finished => Err(RejectError::AlreadyFinished),
    }
}

pub fn check_delete(
    status: MessageStatus,
    creator_id: i64,
    actor_id: i64,
) -> Result<(), DeleteError> {
    if creator_id != actor_id {
        return Err(DeleteError::NotCreator);
    }
    match status {
        MessageStatus::Draft => Ok(()),
        MessageStatus::Deleted => Err(DeleteError::AlreadyDeleted),
        MessageStatus::Finished => Err(DeleteError::Finished),
        MessageStatus::Rejected => Err(DeleteError::Rejected),
        MessageStatus::Formed => Err(DeleteError::AlreadyFormed),
    }
}

pub fn check_draft_edit(
    status: MessageStatus,
    creator_id: i64,
    actor_id: i64,
) -> Result<(), DraftEditError> {
    if creator_id != actor_id {
        return Err(DraftEditError::NotCreator);
    }
    if status != MessageStatus::Draft {
        return Err(DraftEditError::NotDraft(status));
    }
    Ok(())
}
