use crate::Database;
use crate::models::{ChatRow, UserRow};
use anyhow::Result;
use herald_types::api::ChatInput;
use herald_types::models::Chat;
use rusqlite::{Connection, OptionalExtension, Row};

impl Database {
    // -- Users --

    /// Inserts a user unless the login is taken. Returns `None` on a taken login.
    pub fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        is_moderator: bool,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (login, password, is_moderator) VALUES (?1, ?2, ?3)
                 ON CONFLICT(login) DO NOTHING",
                rusqlite::params![login, password_hash, is_moderator],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            query_user_by_login(conn, login)
        })
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_login(conn, login))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, login, password, is_moderator FROM users WHERE id = ?1",
                    [id],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                rusqlite::params![password_hash, id],
            )?;
            Ok(n == 1)
        })
    }

    /// Grants the moderator flag, creating the account with `password_hash`
    /// when the login does not exist yet. Returns true when a user was created.
    pub fn ensure_moderator(&self, login: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            if query_user_by_login(conn, login)?.is_some() {
                conn.execute("UPDATE users SET is_moderator = 1 WHERE login = ?1", [login])?;
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO users (login, password, is_moderator) VALUES (?1, ?2, 1)",
                rusqlite::params![login, password_hash],
            )?;
            Ok(true)
        })
    }

    // -- Chats --

    /// Non-deleted chats ordered by id, optionally narrowed to names containing
    /// `name_filter` (case-insensitive).
    ///
    /// SQLite's LIKE only folds ASCII, so the filter is applied here with full
    /// Unicode lowercasing instead.
    pub fn list_chats(&self, name_filter: Option<&str>) -> Result<Vec<Chat>> {
        let needle = name_filter
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, is_delete, img, name, info, nickname, friends, subscribers
                 FROM chats WHERE is_delete = 0 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter(|row| match &needle {
                    Some(n) => row.name.to_lowercase().contains(n.as_str()),
                    None => true,
                })
                .map(ChatRow::into_chat)
                .collect())
        })
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        self.with_conn(|conn| Ok(query_live_chat(conn, id)?.map(ChatRow::into_chat)))
    }

    pub fn create_chat(&self, input: &ChatInput) -> Result<Chat> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chats (name, info, nickname, friends, subscribers)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    input.name.trim(),
                    input.info,
                    input.nickname.trim(),
                    input.friends,
                    input.subscribers
                ],
            )?;
            let id = conn.last_insert_rowid();
            let row = query_live_chat(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("chat {} missing right after insert", id))?;
            Ok(row.into_chat())
        })
    }

    /// Returns `None` when the chat does not exist or is deleted.
    pub fn update_chat(&self, id: i64, input: &ChatInput) -> Result<Option<Chat>> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE chats SET name = ?1, info = ?2, nickname = ?3, friends = ?4, subscribers = ?5
                 WHERE id = ?6 AND is_delete = 0",
                rusqlite::params![
                    input.name.trim(),
                    input.info,
                    input.nickname.trim(),
                    input.friends,
                    input.subscribers,
                    id
                ],
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(query_live_chat(conn, id)?.map(ChatRow::into_chat))
        })
    }

    /// Soft delete. Returns false when there was no live chat with this id.
    pub fn soft_delete_chat(&self, id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE chats SET is_delete = 1 WHERE id = ?1 AND is_delete = 0",
                [id],
            )?;
            Ok(n == 1)
        })
    }

    pub fn set_chat_image(&self, id: i64, img: &str) -> Result<Option<Chat>> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE chats SET img = ?1 WHERE id = ?2 AND is_delete = 0",
                rusqlite::params![img, id],
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(query_live_chat(conn, id)?.map(ChatRow::into_chat))
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        login: row.get(1)?,
        password: row.get(2)?,
        is_moderator: row.get(3)?,
    })
}

fn query_user_by_login(conn: &Connection, login: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, login, password, is_moderator FROM users WHERE login = ?1",
            [login],
            user_from_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        is_delete: row.get(1)?,
        img: row.get(2)?,
        name: row.get(3)?,
        info: row.get(4)?,
        nickname: row.get(5)?,
        friends: row.get(6)?,
        subscribers: row.get(7)?,
    })
}

pub(crate) fn query_live_chat(conn: &Connection, id: i64) -> Result<Option<ChatRow>> {
    let row = conn
        .query_row(
            "SELECT id, is_delete, img, name, info, nickname, friends, subscribers
             FROM chats WHERE id = ?1 AND is_delete = 0",
            [id],
            chat_from_row,
        )
        .optional()?;
    Ok(row)
}
