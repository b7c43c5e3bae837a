//! Timed session expiry and explicit destruction.

use std::sync::Arc;

use {
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use {
    porter_channels::MessageLog,
    porter_common::{EventBus, now_ms},
};

use crate::{
    error::{Error, Result},
    session::Session,
    store::SessionStore,
};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    /// Inactivity window after which a session is reclaimed.
    pub session_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 24 * 60 * 60 * 1_000,
            cleanup_interval_ms: 60 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionsCleanedUp { count: usize },
    SessionDestroyed { session_id: String },
    SessionResumed { session_id: String },
}

/// Ownership tuple a caller must present to resume a session by id.
/// Guards against session-id guessing across channels.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    pub channel_type: String,
    pub channel_id: String,
    pub user_id: String,
}

pub struct SessionLifecycleManager {
    store: Arc<dyn SessionStore>,
    message_log: Arc<dyn MessageLog>,
    config: LifecycleConfig,
    events: Arc<EventBus<SessionEvent>>,
}

impl SessionLifecycleManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        message_log: Arc<dyn MessageLog>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            message_log,
            config,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<SessionEvent>> {
        Arc::clone(&self.events)
    }

    /// Destroy a session. Message-log rows are deleted *before* the session
    /// record so an observer never sees orphan messages.
    pub async fn destroy(&self, session_id: &str) -> Result<bool> {
        self.message_log
            .delete_for_session(session_id)
            .await
            .map_err(|e| Error::MessageLog(e.to_string()))?;
        let removed = self.store.remove(session_id).await?.is_some();
        if removed {
            info!(session_id = %session_id, "session destroyed");
            self.events.emit(&SessionEvent::SessionDestroyed {
                session_id: session_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Destroy every session idle past the timeout. Returns the count.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_expired_at(now_ms()).await
    }

    pub async fn cleanup_expired_at(&self, now: u64) -> Result<usize> {
        let sessions = self.store.list().await?;
        let mut count = 0;
        for session in sessions {
            let idle = now.saturating_sub(session.last_activity_at);
            if idle > self.config.session_timeout_ms && self.destroy(&session.session_id).await? {
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "expired sessions cleaned up");
            self.events
                .emit(&SessionEvent::SessionsCleanedUp { count });
        }
        Ok(count)
    }

    /// Resume a session by id. Returns `None` unless all three ownership
    /// fields match the stored session; a match bumps `last_activity_at`.
    pub async fn resume(&self, session_id: &str, ctx: &ResumeContext) -> Result<Option<Session>> {
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(None);
        };
        if session.channel_type != ctx.channel_type
            || session.channel_id != ctx.channel_id
            || session.user_id != ctx.user_id
        {
            debug!(session_id = %session_id, "resume denied: ownership mismatch");
            return Ok(None);
        }
        session.touch(now_ms());
        self.store.put(session.clone()).await?;
        self.events.emit(&SessionEvent::SessionResumed {
            session_id: session_id.to_string(),
        });
        Ok(Some(session))
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let manager = self;
        let interval = std::time::Duration::from_millis(manager.config.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = manager.cleanup_expired().await {
                    warn!(error = %e, "session cleanup sweep failed");
                }
            }
        })
    }
}
