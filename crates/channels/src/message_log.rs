use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A single logged inbound or outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogEntry {
    pub session_id: String,
    pub channel_type: String,
    pub chat_id: String,
    pub user_id: String,
    pub direction: Direction,
    pub body: String,
    /// Millisecond epoch.
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Persistent per-session message log. Injected by the host; the core only
/// depends on this interface. Session destruction deletes log rows for the
/// session before the session record itself is removed.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, entry: MessageLogEntry) -> Result<()>;

    async fn count_for_session(&self, session_id: &str) -> Result<u64>;

    async fn list_for_session(&self, session_id: &str, limit: u32)
    -> Result<Vec<MessageLogEntry>>;

    /// Delete all rows for a session; returns how many were removed.
    async fn delete_for_session(&self, session_id: &str) -> Result<u64>;
}

// ── In-memory implementation ────────────────────────────────────────────────

/// In-memory log used by tests and the loopback channel.
#[derive(Default)]
pub struct MemoryMessageLog {
    entries: tokio::sync::RwLock<Vec<MessageLogEntry>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, entry: MessageLogEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn count_for_session(&self, session_id: &str) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| e.session_id == session_id).count() as u64)
    }

    async fn list_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageLogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_for_session(&self, session_id: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.session_id != session_id);
        Ok((before - entries.len()) as u64)
    }
}
