use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use herald_types::MessageStatus;
use herald_types::models::{AttachedChat, DraftSummary, MessageDetail, MessageSummary};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

use crate::models::{ChatRow, MessageChatRow, MessageRow};
use crate::queries::chat_from_row;
use crate::{Database, format_time, parse_time};

/// Result of a guarded status transition.
#[derive(Debug)]
pub enum Transition<E> {
    /// The guard accepted and the change was committed; holds the new row.
    Applied(MessageRow),
    /// The guard refused against the current row; nothing was written.
    Refused(E),
    /// No message with this id.
    Missing,
}

/// Full set of mutable message columns after a transition, plus per-item
/// read marks to write in the same transaction.
#[derive(Debug, Clone)]
pub struct MessageChange {
    pub status: MessageStatus,
    pub text: String,
    pub date_update: DateTime<Utc>,
    pub date_finish: Option<DateTime<Utc>>,
    pub moderator_id: Option<i64>,
    pub read_marks: Vec<(i64, bool)>,
}

impl MessageChange {
    /// Starts from the row as it is, so a guard only sets what it changes.
    pub fn from_row(row: &MessageRow) -> Self {
        Self {
            status: row.status,
            text: row.text.clone(),
            date_update: row.date_update,
            date_finish: row.date_finish,
            moderator_id: row.moderator_id,
            read_marks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// `inserted` is false when the chat was already on the draft.
    Attached { message_id: i64, inserted: bool },
    ChatMissing,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ItemOutcome<E, T> {
    Done(T),
    Refused(E),
    MessageMissing,
    ItemMissing,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub status: Option<MessageStatus>,
    pub updated_from: Option<DateTime<Utc>>,
    pub updated_to: Option<DateTime<Utc>>,
    /// Restrict to one creator; `None` lists everyone's.
    pub creator_id: Option<i64>,
}

const MESSAGE_COLUMNS: &str =
    "id, status, text, date_create, date_update, date_finish, creator_id, moderator_id";

const SUMMARY_SELECT: &str = "SELECT m.id, m.status, m.text, m.date_create, m.date_update, m.date_finish,
            c.login, md.login
     FROM messages m
     JOIN users c ON m.creator_id = c.id
     LEFT JOIN users md ON m.moderator_id = md.id";

impl Database {
    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn message_items(&self, message_id: i64) -> Result<Vec<MessageChatRow>> {
        self.with_conn(|conn| query_items(conn, message_id))
    }

    /// The creator's current draft and how many chats it holds.
    pub fn draft_summary(&self, creator_id: i64) -> Result<DraftSummary> {
        self.with_conn(|conn| {
            let summary = conn
                .query_row(
                    "SELECT m.id, (SELECT COUNT(*) FROM message_chats mc WHERE mc.message_id = m.id)
                     FROM messages m
                     WHERE m.creator_id = ?1 AND m.status = 'draft'",
                    [creator_id],
                    |row| {
                        Ok(DraftSummary {
                            draft_id: row.get(0)?,
                            item_count: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(summary.unwrap_or_default())
        })
    }

    /// Puts a live chat on the creator's draft, creating the draft first when
    /// there is none. Attaching a chat that is already there changes nothing.
    pub fn attach_chat(
        &self,
        creator_id: i64,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AttachOutcome> {
        let now = format_time(now);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let live: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1 AND is_delete = 0)",
                [chat_id],
                |r| r.get(0),
            )?;
            if !live {
                return Ok(AttachOutcome::ChatMissing);
            }

            let message_id = find_or_create_draft(&tx, creator_id, &now)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO message_chats (message_id, chat_id) VALUES (?1, ?2)",
                [message_id, chat_id],
            )? == 1;
            if inserted {
                tx.execute(
                    "UPDATE messages SET date_update = ?1 WHERE id = ?2",
                    rusqlite::params![now, message_id],
                )?;
            }

            tx.commit()?;
            Ok(AttachOutcome::Attached { message_id, inserted })
        })
    }

    /// Re-reads the message under the write lock, lets `guard` decide, and
    /// writes the change only if the status is still the one the guard saw.
    ///
    /// The writer lock and the IMMEDIATE transaction hold the row still
    /// between read and write, so a status mismatch at the `UPDATE` means
    /// something wrote outside this `Database` and is reported as an error.
    pub fn transition_message<E, G>(&self, id: i64, guard: G) -> Result<Transition<E>>
    where
        G: FnOnce(&MessageRow, &[MessageChatRow]) -> std::result::Result<MessageChange, E>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(current) = query_message(&tx, id)? else {
                return Ok(Transition::Missing);
            };
            let items = query_items(&tx, id)?;

            let change = match guard(&current, &items) {
                Ok(change) => change,
                Err(refusal) => return Ok(Transition::Refused(refusal)),
            };

            let updated = tx.execute(
                "UPDATE messages
                 SET status = ?1, text = ?2, date_update = ?3, date_finish = ?4, moderator_id = ?5
                 WHERE id = ?6 AND status = ?7",
                rusqlite::params![
                    change.status.as_str(),
                    change.text,
                    format_time(change.date_update),
                    change.date_finish.map(format_time),
                    change.moderator_id,
                    id,
                    current.status.as_str(),
                ],
            )?;
            if updated != 1 {
                return Err(anyhow!(
                    "message {} left status {} during its own transition",
                    id,
                    current.status.as_str()
                ));
            }

            for (chat_id, is_read) in &change.read_marks {
                tx.execute(
                    "UPDATE message_chats SET is_read = ?1 WHERE message_id = ?2 AND chat_id = ?3",
                    rusqlite::params![is_read, id, chat_id],
                )?;
            }

            let row = query_message(&tx, id)?
                .ok_or_else(|| anyhow!("message {} vanished mid-transition", id))?;
            tx.commit()?;
            Ok(Transition::Applied(row))
        })
    }

    /// Removes a chat from a message the guard allows editing.
    pub fn detach_chat<E, G>(
        &self,
        message_id: i64,
        chat_id: i64,
        now: DateTime<Utc>,
        guard: G,
    ) -> Result<ItemOutcome<E, ()>>
    where
        G: FnOnce(&MessageRow) -> std::result::Result<(), E>,
    {
        let now = format_time(now);
        self.edit_item(message_id, guard, |conn| {
            let n = conn.execute(
                "DELETE FROM message_chats WHERE message_id = ?1 AND chat_id = ?2",
                [message_id, chat_id],
            )?;
            if n == 0 {
                return Ok(None);
            }
            conn.execute(
                "UPDATE messages SET date_update = ?1 WHERE id = ?2",
                rusqlite::params![now, message_id],
            )?;
            Ok(Some(()))
        })
    }

    /// Flips an item's sound flag and returns the new value.
    pub fn toggle_sound<E, G>(
        &self,
        message_id: i64,
        chat_id: i64,
        guard: G,
    ) -> Result<ItemOutcome<E, bool>>
    where
        G: FnOnce(&MessageRow) -> std::result::Result<(), E>,
    {
        self.edit_item(message_id, guard, |conn| {
            let current: Option<bool> = conn
                .query_row(
                    "SELECT sound FROM message_chats WHERE message_id = ?1 AND chat_id = ?2",
                    [message_id, chat_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE message_chats SET sound = ?1 WHERE message_id = ?2 AND chat_id = ?3",
                rusqlite::params![!current, message_id, chat_id],
            )?;
            Ok(Some(!current))
        })
    }

    fn edit_item<E, T, G, F>(&self, message_id: i64, guard: G, op: F) -> Result<ItemOutcome<E, T>>
    where
        G: FnOnce(&MessageRow) -> std::result::Result<(), E>,
        F: FnOnce(&Connection) -> Result<Option<T>>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let Some(message) = query_message(&tx, message_id)? else {
                return Ok(ItemOutcome::MessageMissing);
            };
            if let Err(refusal) = guard(&message) {
                return Ok(ItemOutcome::Refused(refusal));
            }

            match op(&tx)? {
                Some(value) => {
                    tx.commit()?;
                    Ok(ItemOutcome::Done(value))
                }
                None => Ok(ItemOutcome::ItemMissing),
            }
        })
    }

    /// Listed messages (never drafts or deleted ones), oldest first.
    pub fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<MessageSummary>> {
        let sql = format!(
            "{SUMMARY_SELECT}
             WHERE m.status NOT IN ('draft', 'deleted')
               AND (?1 IS NULL OR m.status = ?1)
               AND (?2 IS NULL OR m.date_update >= ?2)
               AND (?3 IS NULL OR m.date_update <= ?3)
               AND (?4 IS NULL OR m.creator_id = ?4)
             ORDER BY m.id"
        );
        let status = filter.status.map(MessageStatus::as_str);
        let from = filter.updated_from.map(format_time);
        let to = filter.updated_to.map(format_time);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![status, from, to, filter.creator_id],
                    summary_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// A message with its attached chats and their flags.
    pub fn message_detail(&self, id: i64) -> Result<Option<MessageDetail>> {
        self.with_conn(|conn| query_detail(conn, id))
    }

    /// The raw row and the detail view of one message, read from a single
    /// snapshot so both reflect the same commit.
    pub fn message_view(&self, id: i64) -> Result<Option<(MessageRow, MessageDetail)>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let view = match (query_message(&tx, id)?, query_detail(&tx, id)?) {
                (Some(row), Some(detail)) => Some((row, detail)),
                _ => None,
            };
            tx.finish()?;
            Ok(view)
        })
    }
}

fn query_detail(conn: &Connection, id: i64) -> Result<Option<MessageDetail>> {
    let summary = conn
        .query_row(
            &format!("{SUMMARY_SELECT} WHERE m.id = ?1"),
            [id],
            summary_from_row,
        )
        .optional()?;
    let Some(summary) = summary else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT c.id, c.is_delete, c.img, c.name, c.info, c.nickname, c.friends, c.subscribers,
                mc.sound, mc.is_read
         FROM message_chats mc
         JOIN chats c ON mc.chat_id = c.id
         WHERE mc.message_id = ?1
         ORDER BY mc.id",
    )?;
    let chats = stmt
        .query_map([id], |row| {
            let chat: ChatRow = chat_from_row(row)?;
            Ok(AttachedChat {
                chat: chat.into_chat(),
                sound: row.get(8)?,
                is_read: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(MessageDetail { summary, chats }))
}

fn find_or_create_draft(conn: &Connection, creator_id: i64, now: &str) -> Result<i64> {
    if let Some(id) = query_draft_id(conn, creator_id)? {
        return Ok(id);
    }
    // The partial unique index turns a lost race into an ignored insert;
    // either way the re-read below finds the single draft.
    conn.execute(
        "INSERT OR IGNORE INTO messages (status, text, date_create, date_update, creator_id)
         VALUES ('draft', '', ?1, ?1, ?2)",
        rusqlite::params![now, creator_id],
    )?;
    query_draft_id(conn, creator_id)?
        .ok_or_else(|| anyhow!("draft for user {} missing after insert", creator_id))
}

fn query_draft_id(conn: &Connection, creator_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM messages WHERE creator_id = ?1 AND status = 'draft'",
            [creator_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<MessageStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn optional_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(idx, &s)).transpose()
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    status: status_at(row, 1)?,
                    text: row.get(2)?,
                    date_create: time_at(row, 3)?,
                    date_update: time_at(row, 4)?,
                    date_finish: optional_time_at(row, 5)?,
                    creator_id: row.get(6)?,
                    moderator_id: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_items(conn: &Connection, message_id: i64) -> Result<Vec<MessageChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, chat_id, sound, is_read FROM message_chats
         WHERE message_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([message_id], |row| {
            Ok(MessageChatRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                chat_id: row.get(2)?,
                sound: row.get(3)?,
                is_read: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<MessageSummary> {
    Ok(MessageSummary {
        id: row.get(0)?,
        status: status_at(row, 1)?,
        text: row.get(2)?,
        date_create: time_at(row, 3)?,
        date_update: time_at(row, 4)?,
        date_finish: optional_time_at(row, 5)?,
        creator: row.get(6)?,
        moderator: row.get(7)?,
    })
}
