//! Shared gateway runtime state.
//!
//! Every service is an explicit value constructed at startup and threaded
//! through `Arc`; there are no ambient globals, so tests build a fresh
//! state per case.

use std::{sync::Arc, time::Instant};

use tokio::{sync::RwLock, task::JoinHandle};

use {
    porter_agent::AgentConnection,
    porter_channels::{AdapterRegistry, MessageLog},
    porter_common::ErrorRegistry,
    porter_nodes::{NodeConnectionManager, NodeRegistry, PairingManager},
    porter_sessions::{
        DirectiveManager, LifecycleConfig, SessionLifecycleManager, SessionManager,
        SessionManagerConfig, SessionStore,
    },
    porter_usage::UsageTracker,
};

use crate::{
    rate_limit::{RateLimitConfig, RateLimiter},
    router::Router,
};

pub struct GatewayState {
    pub errors: Arc<ErrorRegistry>,
    pub sessions: Arc<SessionManager>,
    pub lifecycle: Arc<SessionLifecycleManager>,
    pub directives: Arc<DirectiveManager>,
    pub usage: Arc<UsageTracker>,
    pub agent: Arc<AgentConnection>,
    pub nodes: Arc<NodeConnectionManager>,
    pub adapters: Arc<AdapterRegistry>,
    pub message_log: Arc<dyn MessageLog>,
    pub api_limiter: Arc<RateLimiter>,
    pub router: Arc<Router>,
    pub started_at: Instant,
}

impl GatewayState {
    /// Wire the full service graph from its injected stores and the
    /// worker transport.
    pub fn new(
        session_config: SessionManagerConfig,
        lifecycle_config: LifecycleConfig,
        store: Arc<dyn SessionStore>,
        message_log: Arc<dyn MessageLog>,
        agent: Arc<AgentConnection>,
    ) -> Arc<Self> {
        let errors = Arc::new(ErrorRegistry::new());
        let sessions = Arc::new(SessionManager::new(session_config, Arc::clone(&store)));
        let lifecycle = Arc::new(SessionLifecycleManager::new(
            Arc::clone(&store),
            Arc::clone(&message_log),
            lifecycle_config,
        ));
        let directives = Arc::new(DirectiveManager::new());
        let usage = Arc::new(UsageTracker::default());
        let nodes = Arc::new(NodeConnectionManager::new(
            Arc::new(RwLock::new(NodeRegistry::new())),
            Arc::new(RwLock::new(PairingManager::new())),
        ));
        let adapters = Arc::new(AdapterRegistry::new());
        let api_limiter = Arc::new(RateLimiter::new(RateLimitConfig::api_default()));
        let chat_limiter = Arc::new(RateLimiter::new(RateLimitConfig::chat_default()));

        let router = Router::new(
            Arc::clone(&errors),
            Arc::clone(&sessions),
            Arc::clone(&directives),
            Arc::clone(&agent),
            Arc::clone(&usage),
            chat_limiter,
            Arc::clone(&adapters),
            Arc::clone(&message_log),
        );

        Arc::new(Self {
            errors,
            sessions,
            lifecycle,
            directives,
            usage,
            agent,
            nodes,
            adapters,
            message_log,
            api_limiter,
            router,
            started_at: Instant::now(),
        })
    }

    /// Spawn the periodic sweeps: session expiry, companion heartbeat
    /// monitoring, and rate-limit window cleanup.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.lifecycle).spawn_sweeper(),
            Arc::clone(&self.nodes).spawn_heartbeat_monitor(),
            Arc::clone(&self.api_limiter).spawn_sweeper(),
            self.router.chat_limiter().spawn_sweeper(),
        ]
    }
}
