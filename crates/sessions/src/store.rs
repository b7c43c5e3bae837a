use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{error::Result, session::Session};

/// Injected key-value session store. The core only depends on this
/// interface; persistence (sqlite, redis, ...) is the host's concern.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Insert or replace.
    async fn put(&self, session: Session) -> Result<()>;

    async fn remove(&self, session_id: &str) -> Result<Option<Session>>;

    async fn list(&self) -> Result<Vec<Session>>;

    async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.write().await.remove(session_id))
    }

    async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sessions.read().await.len())
    }
}
