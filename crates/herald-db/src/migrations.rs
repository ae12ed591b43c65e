use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Database: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                login        TEXT NOT NULL UNIQUE,
                password     TEXT NOT NULL,
                is_moderator INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                is_delete   INTEGER NOT NULL DEFAULT 0,
                img         TEXT NOT NULL DEFAULT '',
                name        TEXT NOT NULL,
                info        TEXT NOT NULL DEFAULT '',
                nickname    TEXT NOT NULL,
                friends     INTEGER NOT NULL DEFAULT 0,
                subscribers INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE messages (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                status       TEXT NOT NULL,
                text         TEXT NOT NULL DEFAULT '',
                date_create  TEXT NOT NULL,
                date_update  TEXT NOT NULL,
                date_finish  TEXT,
                creator_id   INTEGER NOT NULL REFERENCES users(id),
                moderator_id INTEGER REFERENCES users(id)
            );

            -- One cart per user
            CREATE UNIQUE INDEX idx_messages_single_draft
                ON messages(creator_id) WHERE status = 'draft';

            CREATE INDEX idx_messages_status
                ON messages(status, date_update);

            CREATE TABLE message_chats (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id),
                chat_id    INTEGER NOT NULL REFERENCES chats(id),
                sound      INTEGER NOT NULL DEFAULT 1,
                is_read    INTEGER NOT NULL DEFAULT 0,
                UNIQUE(message_id, chat_id)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
