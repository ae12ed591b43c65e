use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Server-side registry of the one live token per user.
///
/// A presented token is only honoured while it equals the stored one, so
/// deleting the entry revokes a token that is still cryptographically valid.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores `token` for `user_id`, replacing any previous one.
    async fn set(&self, user_id: i64, token: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, user_id: i64) -> anyhow::Result<Option<String>>;

    async fn delete(&self, user_id: i64) -> anyhow::Result<()>;
}

struct Entry {
    token: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process session store. Expired entries are ignored on read and
/// swept on the next write.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<i64, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, user_id: i64, token: &str, ttl: Duration) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            user_id,
            Entry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, user_id: i64) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(&user_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.token.clone()))
    }

    async fn delete(&self, user_id: i64) -> anyhow::Result<()> {
        self.entries.write().await.remove(&user_id);
        Ok(())
    }
}
