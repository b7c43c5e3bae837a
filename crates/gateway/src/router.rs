//! Chat entrypoint: channel → session → quota → worker → reply.
//!
//! The router is the only integration layer; it owns no protocol state
//! beyond per-session turn serialization and the pending-interrupt map.
//! Turns for one session run strictly in order; distinct sessions are
//! unrestricted.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, Weak},
};

use {
    serde_json::json,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use {
    porter_agent::AgentConnection,
    porter_channels::{
        AdapterRegistry, ChannelAdapter, ChannelMessage, MessageLog, OutboundMessage,
        message_log::{Direction, MessageLogEntry},
    },
    porter_common::{ErrorRegistry, now_ms},
    porter_sessions::{DirectiveManager, SessionManager},
    porter_usage::{ApiCall, UsageTracker},
};

use crate::rate_limit::RateLimiter;

pub struct Router {
    errors: Arc<ErrorRegistry>,
    sessions: Arc<SessionManager>,
    directives: Arc<DirectiveManager>,
    agent: Arc<AgentConnection>,
    usage: Arc<UsageTracker>,
    chat_limiter: Arc<RateLimiter>,
    adapters: Arc<AdapterRegistry>,
    message_log: Arc<dyn MessageLog>,
    /// Per-session turn serialization.
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Outstanding approval interrupts, session id → interrupt id.
    pending_interrupts: Mutex<HashMap<String, String>>,
    /// Self-handle for the adapter callbacks installed by `attach`.
    weak_self: OnceLock<Weak<Router>>,
}

/// Interpret a message as an approval decision for a pending interrupt.
fn parse_decision(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "/approve" | "approve" | "yes" => Some(true),
        "/deny" | "deny" | "no" => Some(false),
        _ => None,
    }
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        errors: Arc<ErrorRegistry>,
        sessions: Arc<SessionManager>,
        directives: Arc<DirectiveManager>,
        agent: Arc<AgentConnection>,
        usage: Arc<UsageTracker>,
        chat_limiter: Arc<RateLimiter>,
        adapters: Arc<AdapterRegistry>,
        message_log: Arc<dyn MessageLog>,
    ) -> Arc<Self> {
        let router = Arc::new(Self {
            errors,
            sessions,
            directives,
            agent,
            usage,
            chat_limiter,
            adapters,
            message_log,
            turn_locks: Mutex::new(HashMap::new()),
            pending_interrupts: Mutex::new(HashMap::new()),
            weak_self: OnceLock::new(),
        });
        let _ = router.weak_self.set(Arc::downgrade(&router));
        router
    }

    pub fn chat_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.chat_limiter)
    }

    /// Register an adapter and start routing its messages.
    pub fn attach(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.register(Arc::clone(&adapter));
        let Some(router) = self.weak_self.get().and_then(Weak::upgrade) else {
            return;
        };
        adapter.on_message(Arc::new(move |message| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router.handle_message(message).await;
            });
        }));
    }

    /// Process one inbound message end to end and deliver the reply.
    pub async fn handle_message(&self, message: ChannelMessage) {
        if let Some(reply) = self.process(&message).await {
            self.reply(&message, &reply).await;
        }
    }

    async fn process(&self, message: &ChannelMessage) -> Option<String> {
        // 1. Chat-level quota, keyed by sender.
        let limiter_key = format!("{}:{}", message.channel_type, message.user_id);
        let now = now_ms();
        let decision = self.chat_limiter.check_at(&limiter_key, now);
        if !decision.allowed {
            debug!(key = %limiter_key, "chat rate limit exceeded");
            return Some(format!(
                "{} Try again in {}s.",
                self.errors.definition("GW-API-004").message,
                decision.retry_after_secs(now)
            ));
        }

        // 2. Session identity.
        let session = match self
            .sessions
            .get_or_create(
                &message.channel_type,
                &message.channel_id,
                &message.chat_id,
                &message.user_id,
                message.user_name.as_deref(),
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return Some(self.errors.definition(e.code()).message.to_string());
            },
        };

        self.log_message(&session.session_id, message, Direction::Inbound)
            .await;

        // 3. Admission.
        if !self.sessions.is_paired(&session.session_id).await {
            return Some(self.handle_unpaired(&session.session_id, &session, message).await);
        }

        if let Err(e) = self.sessions.touch(&session.session_id).await {
            warn!(error = %e, "touch failed");
        }

        // 4-8. The turn itself. The session's turn lock is held until the
        // reply has been handed to the adapter, so the next turn for this
        // session cannot start before this one's outcome is delivered.
        let lock = self.turn_lock(&session.session_id).await;
        let _guard = lock.lock().await;
        let reply = self.run_turn(&session.session_id, message).await;
        self.log_outbound(&session.session_id, message, &reply).await;
        self.reply(message, &reply).await;
        None
    }

    async fn handle_unpaired(
        &self,
        session_id: &str,
        session: &porter_sessions::Session,
        message: &ChannelMessage,
    ) -> String {
        let now = now_ms();
        if session.has_live_pairing_code(now) {
            // Maybe the body is the code.
            match self.sessions.approve(session_id, message.text.trim()).await {
                Ok(true) => {
                    info!(session_id = %session_id, "session paired from chat");
                    return "Paired. Messages in this chat now reach the assistant.".to_string();
                },
                Ok(false) => {},
                Err(e) => {
                    warn!(error = %e, "approve failed");
                    return self.errors.definition(e.code()).message.to_string();
                },
            }
            let code = session.pairing_code.clone().unwrap_or_default();
            return format!(
                "This chat is awaiting approval. Pairing code: {code}. \
                 Ask the gateway operator to approve it, or reply with the code."
            );
        }

        match self.sessions.generate_pairing_code(session_id).await {
            Ok(code) => format!(
                "This chat isn't paired with the assistant yet. \
                 Pairing code: {code}. Ask the gateway operator to approve it, \
                 or reply with the code."
            ),
            Err(e) => {
                warn!(error = %e, "pairing code generation failed");
                self.errors.definition(e.code()).message.to_string()
            },
        }
    }

    /// Execute one turn. Caller holds the session's turn lock.
    async fn run_turn(&self, session_id: &str, message: &ChannelMessage) -> String {
        let pending_interrupt = self
            .pending_interrupts
            .lock()
            .await
            .get(session_id)
            .cloned();

        let result = match (pending_interrupt, parse_decision(&message.text)) {
            (Some(interrupt_id), Some(approved)) => {
                let decisions = json!([{ "interruptId": interrupt_id, "approved": approved }]);
                let result = self.agent.send_resume(session_id, decisions).await;
                if result.is_ok() {
                    self.pending_interrupts.lock().await.remove(session_id);
                }
                result
            },
            _ => {
                let prefix = self.directives.prompt_prefix(session_id);
                let text = format!("{prefix}{}", message.text);
                let metadata = json!({
                    "channelType": message.channel_type,
                    "chatId": message.chat_id,
                    "userId": message.user_id,
                    "userName": message.user_name,
                    "messageId": message.id,
                });
                self.agent.send_turn(session_id, &text, Some(metadata)).await
            },
        };

        match result {
            Ok(turn) => {
                if let Some(usage) = &turn.usage {
                    self.usage.record(ApiCall {
                        provider: usage.provider.clone().unwrap_or_else(|| "unknown".into()),
                        model: usage.model.clone().unwrap_or_else(|| "unknown".into()),
                        session_id: session_id.to_string(),
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        latency_ms: usage.latency_ms.unwrap_or(0),
                        success: true,
                        error_code: None,
                    });
                }

                if let Some(interrupt) = &turn.interrupt {
                    self.pending_interrupts
                        .lock()
                        .await
                        .insert(session_id.to_string(), interrupt.id.clone());
                    let question = interrupt
                        .question
                        .clone()
                        .or_else(|| turn.text.clone())
                        .unwrap_or_else(|| {
                            "The assistant needs your approval to continue.".to_string()
                        });
                    return format!("{question}\nReply \"approve\" or \"deny\".");
                }

                turn.text
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "(no response)".to_string())
            },
            Err(e) => self.turn_error_reply(session_id, &e),
        }
    }

    /// Map a transport failure to the user-facing reply, per the error
    /// taxonomy: worker unavailable/timeout read as transient, admission
    /// errors as terminal, anything unrecognized wraps as GW-INT-001.
    fn turn_error_reply(&self, session_id: &str, error: &porter_agent::Error) -> String {
        let code = error.code();
        let known = self.errors.known(&code);
        let definition = self
            .errors
            .definition(if known { code.as_str() } else { "GW-INT-001" });
        warn!(session_id = %session_id, code = %definition.code, error = %error, "turn failed");
        if definition.retryable {
            format!("{}. Please try again shortly.", definition.message)
        } else if matches!(error, porter_agent::Error::Worker { .. }) {
            // Application error from the worker: surface its message.
            error.to_string()
        } else {
            definition.message.to_string()
        }
    }

    async fn reply(&self, message: &ChannelMessage, text: &str) {
        let Some(adapter) = self
            .adapters
            .get(&message.channel_type, &message.channel_id)
        else {
            warn!(
                channel_type = %message.channel_type,
                channel_id = %message.channel_id,
                "no adapter for reply"
            );
            return;
        };

        let outbound = OutboundMessage::text(text).replying_to(message.id.clone());
        match adapter.send(&message.chat_id, &outbound).await {
            Ok(()) => {},
            // Send failures are retryable once; everything else is terminal.
            Err(e) if e.code() == "GW-CHAN-004" => {
                debug!(error = %e, "send failed; retrying once");
                if let Err(e) = adapter.send(&message.chat_id, &outbound).await {
                    warn!(error = %e, "reply delivery failed");
                }
            },
            Err(e) => warn!(error = %e, "reply delivery failed"),
        }
    }

    async fn turn_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn log_message(
        &self,
        session_id: &str,
        message: &ChannelMessage,
        direction: Direction,
    ) {
        let entry = MessageLogEntry {
            session_id: session_id.to_string(),
            channel_type: message.channel_type.clone(),
            chat_id: message.chat_id.clone(),
            user_id: message.user_id.clone(),
            direction,
            body: message.text.clone(),
            created_at: now_ms(),
        };
        if let Err(e) = self.message_log.append(entry).await {
            warn!(error = %e, "message log append failed");
        }
    }

    async fn log_outbound(&self, session_id: &str, message: &ChannelMessage, text: &str) {
        let entry = MessageLogEntry {
            session_id: session_id.to_string(),
            channel_type: message.channel_type.clone(),
            chat_id: message.chat_id.clone(),
            user_id: "gateway".to_string(),
            direction: Direction::Outbound,
            body: text.to_string(),
            created_at: now_ms(),
        };
        if let Err(e) = self.message_log.append(entry).await {
            warn!(error = %e, "message log append failed");
        }
    }

    pub async fn pending_interrupt(&self, session_id: &str) -> Option<String> {
        self.pending_interrupts.lock().await.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parsing() {
        assert_eq!(parse_decision("approve"), Some(true));
        assert_eq!(parse_decision(" /APPROVE "), Some(true));
        assert_eq!(parse_decision("yes"), Some(true));
        assert_eq!(parse_decision("deny"), Some(false));
        assert_eq!(parse_decision("no"), Some(false));
        assert_eq!(parse_decision("run it"), None);
    }
}
