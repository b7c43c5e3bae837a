//! Central admission store.

use std::sync::Arc;

use {
    rand::Rng,
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::{info, warn},
};

use porter_common::now_ms;

use crate::{
    allowlist::{Allowlist, AllowlistFile},
    error::{Error, Result},
    session::{Session, make_session_id},
    store::SessionStore,
};

/// DM admission policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone may talk to the worker; sessions are born paired.
    Open,
    /// Unknown senders must complete the pairing-code handshake.
    #[default]
    Pairing,
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub dm_policy: DmPolicy,
    pub pairing_code_ttl_ms: u64,
    /// Seed patterns merged with whatever the allowlist file holds.
    pub allowlist_patterns: Vec<String>,
    /// Optional persistence path; supports a leading `~`.
    pub allowlist_path: Option<String>,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            dm_policy: DmPolicy::default(),
            pairing_code_ttl_ms: porter_protocol::SESSION_PAIRING_TTL_MS,
            allowlist_patterns: Vec::new(),
            allowlist_path: None,
        }
    }
}

/// Invoked after every allowlist mutation with the full pattern set.
pub type AllowlistChanged = Arc<dyn Fn(&[String]) + Send + Sync>;

pub struct SessionManager {
    config: SessionManagerConfig,
    store: Arc<dyn SessionStore>,
    allowlist: RwLock<Allowlist>,
    allowlist_file: Option<AllowlistFile>,
    on_allowlist_change: std::sync::RwLock<Option<AllowlistChanged>>,
}

fn random_pairing_code() -> String {
    // Six uppercase hex characters.
    let n: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{n:06X}")
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, store: Arc<dyn SessionStore>) -> Self {
        let allowlist_file = config.allowlist_path.as_deref().map(AllowlistFile::new);
        let mut allowlist = allowlist_file
            .as_ref()
            .map(AllowlistFile::load)
            .unwrap_or_default();
        for pattern in &config.allowlist_patterns {
            allowlist.add(pattern.clone());
        }
        Self {
            config,
            store,
            allowlist: RwLock::new(allowlist),
            allowlist_file,
            on_allowlist_change: std::sync::RwLock::new(None),
        }
    }

    pub fn set_on_allowlist_change(&self, callback: AllowlistChanged) {
        if let Ok(mut slot) = self.on_allowlist_change.write() {
            *slot = Some(callback);
        }
    }

    pub fn dm_policy(&self) -> DmPolicy {
        self.config.dm_policy
    }

    // ── Session identity ────────────────────────────────────────────────

    /// Fetch or lazily create the session for a channel event.
    ///
    /// Existing sessions get `last_activity_at` bumped and, when the event
    /// carries a non-empty display name, `user_name` overwritten.
    pub async fn get_or_create(
        &self,
        channel_type: &str,
        channel_id: &str,
        chat_id: &str,
        user_id: &str,
        user_name: Option<&str>,
    ) -> Result<Session> {
        let session_id = make_session_id(channel_type, channel_id, chat_id)?;
        let now = now_ms();

        if let Some(mut session) = self.store.get(&session_id).await? {
            session.touch(now);
            if let Some(name) = user_name
                && !name.is_empty()
            {
                session.user_name = Some(name.to_string());
            }
            self.store.put(session.clone()).await?;
            return Ok(session);
        }

        let paired = self.is_pre_approved(&session_id, user_id).await;
        let session = Session {
            session_id: session_id.clone(),
            channel_type: channel_type.to_string(),
            channel_id: channel_id.to_string(),
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.filter(|n| !n.is_empty()).map(str::to_string),
            created_at: now,
            last_activity_at: now,
            paired,
            pairing_code: None,
            pairing_code_expires_at: None,
        };
        self.store.put(session.clone()).await?;
        info!(session_id = %session_id, paired, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.store.get(session_id).await
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        self.store.list().await
    }

    pub async fn touch(&self, session_id: &str) -> Result<()> {
        if let Some(mut session) = self.store.get(session_id).await? {
            session.touch(now_ms());
            self.store.put(session).await?;
        }
        Ok(())
    }

    // ── Pairing ─────────────────────────────────────────────────────────

    /// Issue a fresh pairing code for an existing session.
    pub async fn generate_pairing_code(&self, session_id: &str) -> Result<String> {
        self.generate_pairing_code_at(session_id, now_ms()).await
    }

    pub async fn generate_pairing_code_at(&self, session_id: &str, now: u64) -> Result<String> {
        let mut session =
            self.store
                .get(session_id)
                .await?
                .ok_or_else(|| Error::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        let code = random_pairing_code();
        session.pairing_code = Some(code.clone());
        session.pairing_code_expires_at = Some(now + self.config.pairing_code_ttl_ms);
        self.store.put(session).await?;
        Ok(code)
    }

    /// Approve with a pairing code. True iff the session exists and the
    /// code matches the outstanding, unexpired one. On success the session
    /// is paired, the code is consumed, and the session id joins the
    /// allowlist.
    pub async fn approve(&self, session_id: &str, code: &str) -> Result<bool> {
        self.approve_at(session_id, code, now_ms()).await
    }

    pub async fn approve_at(&self, session_id: &str, code: &str, now: u64) -> Result<bool> {
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(false);
        };

        let offered = code.trim().to_uppercase();
        let matches = match (&session.pairing_code, session.pairing_code_expires_at) {
            (Some(expected), Some(expires_at)) => *expected == offered && now <= expires_at,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }

        session.paired = true;
        session.clear_pairing_code();
        self.store.put(session).await?;
        self.add_to_allowlist(session_id).await?;
        info!(session_id = %session_id, "session paired via code");
        Ok(true)
    }

    /// Operator approval without a code. Same post-state as [`approve`].
    pub async fn manual_approve(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(false);
        };
        session.paired = true;
        session.clear_pairing_code();
        self.store.put(session).await?;
        self.add_to_allowlist(session_id).await?;
        info!(session_id = %session_id, "session paired by operator");
        Ok(true)
    }

    /// Admission check at session creation.
    pub async fn is_pre_approved(&self, session_id: &str, user_id: &str) -> bool {
        if self.config.dm_policy == DmPolicy::Open {
            return true;
        }
        let allowlist = self.allowlist.read().await;
        allowlist.matches(session_id) || allowlist.matches(user_id)
    }

    /// True in `open` mode or when the stored session is paired.
    pub async fn is_paired(&self, session_id: &str) -> bool {
        if self.config.dm_policy == DmPolicy::Open {
            return true;
        }
        matches!(
            self.store.get(session_id).await,
            Ok(Some(session)) if session.paired
        )
    }

    // ── Allowlist ───────────────────────────────────────────────────────

    pub async fn add_to_allowlist(&self, pattern: &str) -> Result<()> {
        let patterns = {
            let mut allowlist = self.allowlist.write().await;
            if !allowlist.add(pattern) {
                return Ok(());
            }
            self.persist(&allowlist);
            allowlist.patterns()
        };
        self.notify_allowlist_change(&patterns);
        Ok(())
    }

    pub async fn remove_from_allowlist(&self, pattern: &str) -> Result<bool> {
        let removed;
        let patterns = {
            let mut allowlist = self.allowlist.write().await;
            removed = allowlist.remove(pattern);
            if removed {
                self.persist(&allowlist);
            }
            allowlist.patterns()
        };
        if removed {
            self.notify_allowlist_change(&patterns);
        }
        Ok(removed)
    }

    pub async fn allowlist_patterns(&self) -> Vec<String> {
        self.allowlist.read().await.patterns()
    }

    fn persist(&self, allowlist: &Allowlist) {
        if let Some(file) = &self.allowlist_file
            && let Err(e) = file.save(allowlist)
        {
            warn!(path = %file.path().display(), error = %e, "failed to persist allowlist");
        }
    }

    fn notify_allowlist_change(&self, patterns: &[String]) {
        let callback = self
            .on_allowlist_change
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(patterns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;

    fn manager(policy: DmPolicy) -> SessionManager {
        manager_with(policy, Vec::new())
    }

    fn manager_with(policy: DmPolicy, allowlist: Vec<String>) -> SessionManager {
        SessionManager::new(
            SessionManagerConfig {
                dm_policy: policy,
                allowlist_patterns: allowlist,
                ..SessionManagerConfig::default()
            },
            Arc::new(MemorySessionStore::new()),
        )
    }

    #[tokio::test]
    async fn same_triple_resolves_to_same_session() {
        let manager = manager(DmPolicy::Pairing);
        let first = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();
        let second = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-other", Some("Ada"))
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_activity_at >= first.last_activity_at);
        assert_eq!(second.user_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn empty_user_name_does_not_overwrite() {
        let manager = manager(DmPolicy::Pairing);
        manager
            .get_or_create("cli", "local", "c1", "u1", Some("Grace"))
            .await
            .unwrap();
        let session = manager
            .get_or_create("cli", "local", "c1", "u1", Some(""))
            .await
            .unwrap();
        assert_eq!(session.user_name.as_deref(), Some("Grace"));
    }

    #[tokio::test]
    async fn pairing_handshake_happy_path() {
        let manager = manager(DmPolicy::Pairing);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();
        assert!(!session.paired);

        let code = manager
            .generate_pairing_code(&session.session_id)
            .await
            .unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(code, code.to_uppercase());

        assert!(manager.approve(&session.session_id, &code).await.unwrap());
        assert!(manager.is_paired(&session.session_id).await);

        // Allowlisted, so a fresh event on the same triple is born paired.
        let again = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();
        assert!(again.paired);
        assert!(
            manager
                .allowlist_patterns()
                .await
                .contains(&session.session_id)
        );
    }

    #[tokio::test]
    async fn approve_is_one_shot() {
        let manager = manager(DmPolicy::Pairing);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-1", "u", None)
            .await
            .unwrap();
        let code = manager
            .generate_pairing_code(&session.session_id)
            .await
            .unwrap();

        assert!(manager.approve(&session.session_id, &code).await.unwrap());
        assert!(!manager.approve(&session.session_id, &code).await.unwrap());
    }

    #[tokio::test]
    async fn approve_enforces_ttl() {
        let manager = manager(DmPolicy::Pairing);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();

        let issued_at = now_ms();
        let code = manager
            .generate_pairing_code_at(&session.session_id, issued_at)
            .await
            .unwrap();

        // Eleven minutes later the ten-minute code is dead.
        let late = issued_at + 11 * 60 * 1_000;
        assert!(
            !manager
                .approve_at(&session.session_id, &code, late)
                .await
                .unwrap()
        );
        assert!(!manager.is_paired(&session.session_id).await);
    }

    #[tokio::test]
    async fn wrong_code_is_rejected() {
        let manager = manager(DmPolicy::Pairing);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-1", "u", None)
            .await
            .unwrap();
        manager
            .generate_pairing_code(&session.session_id)
            .await
            .unwrap();
        assert!(
            !manager
                .approve(&session.session_id, "ZZZZZZ")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn generate_for_unknown_session_fails() {
        let manager = manager(DmPolicy::Pairing);
        let err = manager
            .generate_pairing_code("telegram:bot-1:nope")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GW-SESS-001");
    }

    #[tokio::test]
    async fn allowlist_match_preapproves_at_creation() {
        let manager = manager_with(DmPolicy::Pairing, vec!["telegram:bot-1:*".to_string()]);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-42", "user-1", None)
            .await
            .unwrap();
        assert!(session.paired);

        let other = manager
            .get_or_create("discord", "bot-1", "chat-42", "user-1", None)
            .await
            .unwrap();
        assert!(!other.paired);
    }

    #[tokio::test]
    async fn exact_user_id_preapproves() {
        let manager = manager_with(DmPolicy::Pairing, vec!["user-456".to_string()]);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();
        assert!(session.paired);
    }

    #[tokio::test]
    async fn open_policy_pairs_everything() {
        let manager = manager(DmPolicy::Open);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-123", "user-456", None)
            .await
            .unwrap();
        assert!(session.paired);
        assert!(manager.is_paired("telegram:bot-1:never-created").await);
    }

    #[tokio::test]
    async fn manual_approve_skips_code_check() {
        let manager = manager(DmPolicy::Pairing);
        let session = manager
            .get_or_create("telegram", "bot-1", "chat-1", "u", None)
            .await
            .unwrap();
        assert!(manager.manual_approve(&session.session_id).await.unwrap());
        assert!(manager.is_paired(&session.session_id).await);
        assert!(!manager.manual_approve("telegram:bot-1:ghost").await.unwrap());
    }

    #[tokio::test]
    async fn allowlist_change_callback_fires() {
        let manager = manager(DmPolicy::Pairing);
        let seen = Arc::new(std::sync::Mutex::new(Vec::<Vec<String>>::new()));
        let seen_clone = Arc::clone(&seen);
        manager.set_on_allowlist_change(Arc::new(move |patterns| {
            seen_clone.lock().unwrap().push(patterns.to_vec());
        }));

        manager.add_to_allowlist("user-1").await.unwrap();
        manager.add_to_allowlist("user-1").await.unwrap(); // duplicate: no event
        manager.remove_from_allowlist("user-1").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], vec!["user-1".to_string()]);
        assert!(seen[1].is_empty());
    }
}
