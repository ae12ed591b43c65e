//! Message lifecycle operations.
//!
//! Every transition re-reads the message inside a write transaction, runs
//! its guard against what it read, and writes only if the status is still
//! the same. Guards never see stale state and a refused call changes nothing.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::info;

use herald_db::models::{MessageChatRow, MessageRow};
use herald_db::{AttachOutcome, ItemOutcome, MessageChange, MessageFilter, Transition};
use herald_types::MessageStatus;
use herald_types::api::{AttachResponse, StatusResponse};
use herald_types::models::{MessageDetail, MessageSummary};
use herald_types::status::{
    DeleteError, DraftEditError, FinishError, FormError, RejectError, check_delete,
    check_draft_edit, check_finish, check_form, check_reject,
};

use crate::auth::AppStateInner;
use crate::error::ApiError;
use crate::middleware::Identity;

/// Decides each item's read flag when a message is finished.
pub trait ReceiptPolicy: Send + Sync {
    fn mark(&self, item: &MessageChatRow) -> bool;
}

/// Coin flip per item, as the legacy demo backend did.
pub struct RandomReceipts;

impl ReceiptPolicy for RandomReceipts {
    fn mark(&self, _item: &MessageChatRow) -> bool {
        rand::random::<bool>()
    }
}

/// Same answer for every item.
pub struct FixedReceipts(pub bool);

impl ReceiptPolicy for FixedReceipts {
    fn mark(&self, _item: &MessageChatRow) -> bool {
        self.0
    }
}

fn settle<E: Into<ApiError>>(outcome: Transition<E>) -> Result<MessageRow, ApiError> {
    match outcome {
        Transition::Applied(row) => Ok(row),
        Transition::Refused(e) => Err(e.into()),
        Transition::Missing => Err(ApiError::NotFound("message not found")),
    }
}

fn settle_item<E: Into<ApiError>, T>(outcome: ItemOutcome<E, T>) -> Result<T, ApiError> {
    match outcome {
        ItemOutcome::Done(value) => Ok(value),
        ItemOutcome::Refused(e) => Err(e.into()),
        ItemOutcome::MessageMissing => Err(ApiError::NotFound("message not found")),
        ItemOutcome::ItemMissing => Err(ApiError::NotFound("chat is not attached to this message")),
    }
}

fn status_of(row: &MessageRow) -> StatusResponse {
    StatusResponse {
        id: row.id,
        status: row.status,
    }
}

// ── Draft assembly ──────────────────────────────────────────────────────

/// Adds a chat to the caller's draft, creating the draft on first use.
pub async fn attach_chat(
    state: &AppStateInner,
    identity: &Identity,
    chat_id: i64,
) -> Result<AttachResponse, ApiError> {
    let user_id = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| Ok(db.attach_chat(user_id, chat_id, now)?))
        .await?;

    match outcome {
        AttachOutcome::Attached { message_id, inserted } => {
            if inserted {
                info!("User {} attached chat {} to draft {}", identity.login, chat_id, message_id);
            }
            Ok(AttachResponse {
                message_id,
                chat_id,
                attached: inserted,
            })
        }
        AttachOutcome::ChatMissing => Err(ApiError::NotFound("chat not found")),
    }
}

pub async fn detach_chat(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
    chat_id: i64,
) -> Result<(), ApiError> {
    let actor = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.detach_chat(message_id, chat_id, now, |m| {
                check_draft_edit(m.status, m.creator_id, actor)
            })?)
        })
        .await?;
    settle_item(outcome)?;
    info!("User {} detached chat {} from message {}", identity.login, chat_id, message_id);
    Ok(())
}

/// Flips the sound flag of one attached chat; returns the new value.
pub async fn toggle_sound(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
    chat_id: i64,
) -> Result<bool, ApiError> {
    let actor = identity.user_id;
    let outcome = state
        .run_db(move |db| {
            Ok(db.toggle_sound(message_id, chat_id, |m| {
                check_draft_edit(m.status, m.creator_id, actor)
            })?)
        })
        .await?;
    settle_item(outcome)
}

pub async fn edit_text(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
    text: String,
) -> Result<StatusResponse, ApiError> {
    let actor = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.transition_message(message_id, move |m, _| {
                check_draft_edit(m.status, m.creator_id, actor)?;
                let mut change = MessageChange::from_row(m);
                change.text = text;
                change.date_update = now;
                Ok::<_, DraftEditError>(change)
            })?)
        })
        .await?;
    let row = settle(outcome)?;
    Ok(status_of(&row))
}

// ── Transitions ─────────────────────────────────────────────────────────

/// Draft to formed: creator only, text must not be blank.
pub async fn form_message(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
) -> Result<StatusResponse, ApiError> {
    let actor = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.transition_message(message_id, |m, _| {
                check_form(m.status, m.creator_id, actor, &m.text)?;
                let mut change = MessageChange::from_row(m);
                change.status = MessageStatus::Formed;
                change.date_update = now;
                Ok::<_, FormError>(change)
            })?)
        })
        .await?;
    let row = settle(outcome)?;
    info!("Message {} formed by {}", row.id, identity.login);
    Ok(status_of(&row))
}

/// Formed to finished, stamping the moderator and a read flag per item.
/// Callers must have checked the moderator role.
pub async fn finish_message(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
) -> Result<StatusResponse, ApiError> {
    let moderator = identity.user_id;
    let receipts = state.receipts.clone();
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.transition_message(message_id, |m, items| {
                check_finish(m.status)?;
                let mut change = MessageChange::from_row(m);
                change.status = MessageStatus::Finished;
                change.moderator_id = Some(moderator);
                change.date_finish = Some(now);
                change.read_marks = items
                    .iter()
                    .map(|item| (item.chat_id, receipts.mark(item)))
                    .collect();
                Ok::<_, FinishError>(change)
            })?)
        })
        .await?;
    let row = settle(outcome)?;
    info!("Message {} finished by {}", row.id, identity.login);
    Ok(status_of(&row))
}

/// Formed to rejected. Callers must have checked the moderator role.
pub async fn reject_message(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
) -> Result<StatusResponse, ApiError> {
    let moderator = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.transition_message(message_id, |m, _| {
                check_reject(m.status)?;
                let mut change = MessageChange::from_row(m);
                change.status = MessageStatus::Rejected;
                change.moderator_id = Some(moderator);
                change.date_finish = Some(now);
                Ok::<_, RejectError>(change)
            })?)
        })
        .await?;
    let row = settle(outcome)?;
    info!("Message {} rejected by {}", row.id, identity.login);
    Ok(status_of(&row))
}

/// Draft to deleted, creator only. Frees the draft slot.
pub async fn delete_message(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
) -> Result<StatusResponse, ApiError> {
    let actor = identity.user_id;
    let now = Utc::now();
    let outcome = state
        .run_db(move |db| {
            Ok(db.transition_message(message_id, |m, _| {
                check_delete(m.status, m.creator_id, actor)?;
                let mut change = MessageChange::from_row(m);
                change.status = MessageStatus::Deleted;
                change.date_update = now;
                Ok::<_, DeleteError>(change)
            })?)
        })
        .await?;
    let row = settle(outcome)?;
    info!("Message {} deleted by {}", row.id, identity.login);
    Ok(status_of(&row))
}

// ── Reads ───────────────────────────────────────────────────────────────

/// A message with its chats, visible to its creator and to moderators.
pub async fn get_message(
    state: &AppStateInner,
    identity: &Identity,
    message_id: i64,
) -> Result<MessageDetail, ApiError> {
    let view = state
        .run_db(move |db| Ok(db.message_view(message_id)?))
        .await?;

    let (row, detail) = match view {
        Some((row, detail)) if row.status != MessageStatus::Deleted => (row, detail),
        _ => return Err(ApiError::NotFound("message not found")),
    };
    if row.creator_id != identity.user_id && !identity.is_moderator {
        return Err(ApiError::Forbidden("not your message"));
    }
    Ok(detail)
}

/// Raw listing filters as they arrive on the query string.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_day(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| ApiError::validation(format!("{} must be YYYY-MM-DD", field)))
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ListParams {
    /// Both bounds compare against midnight UTC of the given day.
    pub fn to_filter(&self, identity: &Identity) -> Result<MessageFilter, ApiError> {
        let status = non_blank(&self.status)
            .map(|s| s.parse::<MessageStatus>())
            .transpose()
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let updated_from = non_blank(&self.start_date)
            .map(|d| parse_day(d, "start_date"))
            .transpose()?;
        let updated_to = non_blank(&self.end_date)
            .map(|d| parse_day(d, "end_date"))
            .transpose()?;

        Ok(MessageFilter {
            status,
            updated_from,
            updated_to,
            creator_id: (!identity.is_moderator).then_some(identity.user_id),
        })
    }
}

/// Listed messages: moderators see everyone's, others only their own.
pub async fn list_messages(
    state: &AppStateInner,
    identity: &Identity,
    params: &ListParams,
) -> Result<Vec<MessageSummary>, ApiError> {
    let filter = params.to_filter(identity)?;
    state.run_db(move |db| Ok(db.list_messages(&filter)?)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestApp;

    fn who(user_id: i64, is_moderator: bool) -> Identity {
        Identity {
            user_id,
            login: format!("user{user_id}"),
            is_moderator,
        }
    }

    async fn draft_with_text(app: &TestApp, user: &Identity, text: &str) -> i64 {
        let chat = app.chat("Team").await;
        let attached = attach_chat(&app.state, user, chat).await.unwrap();
        edit_text(&app.state, user, attached.message_id, text.to_string())
            .await
            .unwrap();
        attached.message_id
    }

    #[test]
    fn list_params_parse_into_a_filter() {
        let params = ListParams {
            status: Some("formed".into()),
            start_date: Some("2026-03-01".into()),
            end_date: Some(" ".into()),
        };
        let filter = params.to_filter(&who(4, false)).unwrap();
        assert_eq!(filter.status, Some(MessageStatus::Formed));
        assert_eq!(
            filter.updated_from.unwrap().to_rfc3339(),
            "2026-03-01T00:00:00+00:00"
        );
        assert!(filter.updated_to.is_none());
        assert_eq!(filter.creator_id, Some(4));

        let moderator = ListParams::default().to_filter(&who(1, true)).unwrap();
        assert_eq!(moderator.creator_id, None);

        let bad = ListParams {
            start_date: Some("01.03.2026".into()),
            ..Default::default()
        };
        assert!(matches!(bad.to_filter(&who(4, false)), Err(ApiError::Validation(_))));

        let bad = ListParams {
            status: Some("archived".into()),
            ..Default::default()
        };
        assert!(matches!(bad.to_filter(&who(4, false)), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn full_lifecycle_to_finished() {
        let app = TestApp::with_receipts(true).await;
        let alice = app.user("alice").await;
        let moderator = app.moderator("boss").await;

        let id = draft_with_text(&app, &alice, "hello everyone").await;
        assert_eq!(
            form_message(&app.state, &alice, id).await.unwrap().status,
            MessageStatus::Formed
        );
        let formed_at = app.state.db.get_message(id).unwrap().unwrap().date_update;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            finish_message(&app.state, &moderator, id).await.unwrap().status,
            MessageStatus::Finished
        );

        let detail = get_message(&app.state, &alice, id).await.unwrap();
        assert_eq!(detail.summary.moderator.as_deref(), Some("boss"));
        assert!(detail.summary.date_finish.is_some());
        assert!(detail.chats.iter().all(|c| c.is_read));
        // Moderation does not move the message in the update-date window.
        let row = app.state.db.get_message(id).unwrap().unwrap();
        assert_eq!(row.date_update, formed_at);

        // Terminal: nothing moves it any more.
        assert!(matches!(
            reject_message(&app.state, &moderator, id).await,
            Err(ApiError::Reject(_))
        ));
        assert!(matches!(
            delete_message(&app.state, &alice, id).await,
            Err(ApiError::Delete(_))
        ));
    }

    #[tokio::test]
    async fn form_reports_guards_in_order() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;

        let chat = app.chat("Team").await;
        let id = attach_chat(&app.state, &alice, chat).await.unwrap().message_id;

        let err = form_message(&app.state, &bob, id).await.unwrap_err();
        assert_eq!(err.code(), "not_creator");
        let err = form_message(&app.state, &alice, id).await.unwrap_err();
        assert_eq!(err.code(), "empty_text");

        edit_text(&app.state, &alice, id, "hi".into()).await.unwrap();
        form_message(&app.state, &alice, id).await.unwrap();
        let err = form_message(&app.state, &alice, id).await.unwrap_err();
        assert_eq!(err.code(), "already_formed");

        // Once formed the text is frozen.
        let err = edit_text(&app.state, &alice, id, "changed".into()).await.unwrap_err();
        assert_eq!(err.code(), "not_draft");
    }

    #[tokio::test]
    async fn finishing_a_draft_changes_nothing() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let moderator = app.moderator("boss").await;
        let id = draft_with_text(&app, &alice, "not yet").await;

        let err = finish_message(&app.state, &moderator, id).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Finish(herald_types::status::FinishError::NotYetFormed)
        ));

        let row = app.state.db.get_message(id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Draft);
        assert!(row.moderator_id.is_none());
        assert!(row.date_finish.is_none());
    }

    #[tokio::test]
    async fn reject_stamps_moderator_and_date() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let moderator = app.moderator("boss").await;
        let id = draft_with_text(&app, &alice, "please").await;
        form_message(&app.state, &alice, id).await.unwrap();
        let formed_at = app.state.db.get_message(id).unwrap().unwrap().date_update;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        reject_message(&app.state, &moderator, id).await.unwrap();
        let row = app.state.db.get_message(id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Rejected);
        assert_eq!(row.moderator_id, Some(moderator.user_id));
        assert!(row.date_finish.is_some());
        assert_eq!(row.date_update, formed_at);

        let err = finish_message(&app.state, &moderator, id).await.unwrap_err();
        assert_eq!(err.code(), "already_rejected");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_finish_and_reject_settle_exactly_once() {
        for _ in 0..10 {
            let app = TestApp::new().await;
            let alice = app.user("alice").await;
            let first = app.moderator("boss").await;
            let second = app.moderator("chief").await;
            let id = draft_with_text(&app, &alice, "race").await;
            form_message(&app.state, &alice, id).await.unwrap();

            let (finished, rejected) = tokio::join!(
                finish_message(&app.state, &first, id),
                reject_message(&app.state, &second, id),
            );

            let row = app.state.db.get_message(id).unwrap().unwrap();
            match (finished, rejected) {
                (Ok(_), Err(ApiError::Reject(RejectError::AlreadyFinished))) => {
                    assert_eq!(row.status, MessageStatus::Finished);
                    assert_eq!(row.moderator_id, Some(first.user_id));
                }
                (Err(ApiError::Finish(FinishError::AlreadyRejected)), Ok(_)) => {
                    assert_eq!(row.status, MessageStatus::Rejected);
                    assert_eq!(row.moderator_id, Some(second.user_id));
                }
                other => panic!("expected exactly one winner, got {other:?}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_first_attaches_share_one_draft() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let alpha = app.chat("Alpha").await;
        let beta = app.chat("Beta").await;

        let (a, b) = tokio::join!(
            attach_chat(&app.state, &alice, alpha),
            attach_chat(&app.state, &alice, beta),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.message_id, b.message_id);
        assert!(a.attached && b.attached);

        let summary = app.state.db.draft_summary(alice.user_id).unwrap();
        assert_eq!(summary.draft_id, a.message_id);
        assert_eq!(summary.item_count, 2);
    }

    #[tokio::test]
    async fn delete_hides_the_message_and_frees_the_draft() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        let chat = app.chat("Team").await;
        let id = attach_chat(&app.state, &alice, chat).await.unwrap().message_id;

        assert_eq!(
            delete_message(&app.state, &bob, id).await.unwrap_err().code(),
            "not_creator"
        );
        delete_message(&app.state, &alice, id).await.unwrap();
        assert_eq!(
            delete_message(&app.state, &alice, id).await.unwrap_err().code(),
            "already_deleted"
        );
        assert!(matches!(
            get_message(&app.state, &alice, id).await,
            Err(ApiError::NotFound(_))
        ));

        let next = attach_chat(&app.state, &alice, chat).await.unwrap();
        assert_ne!(next.message_id, id);
        assert!(next.attached);
    }

    #[tokio::test]
    async fn strangers_cannot_touch_a_draft() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        let chat = app.chat("Team").await;
        let id = attach_chat(&app.state, &alice, chat).await.unwrap().message_id;

        for err in [
            detach_chat(&app.state, &bob, id, chat).await.unwrap_err(),
            toggle_sound(&app.state, &bob, id, chat).await.unwrap_err(),
            edit_text(&app.state, &bob, id, "x".into()).await.unwrap_err(),
            get_message(&app.state, &bob, id).await.unwrap_err(),
        ] {
            assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN, "{err}");
        }
        assert_eq!(app.state.db.draft_summary(alice.user_id).unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn listing_scopes_to_the_caller() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        let moderator = app.moderator("boss").await;

        let a = draft_with_text(&app, &alice, "from alice").await;
        form_message(&app.state, &alice, a).await.unwrap();
        let b = draft_with_text(&app, &bob, "from bob").await;
        form_message(&app.state, &bob, b).await.unwrap();
        // A draft never lists.
        draft_with_text(&app, &alice, "pending").await;

        let params = ListParams::default();
        let own: Vec<_> = list_messages(&app.state, &alice, &params)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(own, vec![a]);

        let all = list_messages(&app.state, &moderator, &params).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].creator, "bob");
    }
}
