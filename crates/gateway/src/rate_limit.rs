//! Per-key sliding-window rate limiting.
//!
//! Two limiters run in the gateway: a global API limiter (per client IP,
//! health probes exempt) and a stricter chat limiter keyed
//! `channelType:userId`. Windows reset lazily on check and are swept by a
//! background task so abandoned keys do not accumulate.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        body::Body,
        extract::{ConnectInfo, Request, State},
        http::{HeaderValue, StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    tokio::task::JoinHandle,
};

use porter_common::now_ms;

use crate::state::GatewayState;

/// Paths exempt from the global API limiter.
const EXEMPT_PATHS: &[&str] = &["/health", "/healthz"];

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Global API limiter: 100 requests/min per client.
    pub fn api_default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }

    /// Chat limiter: 30 messages/min per sender.
    pub fn chat_default() -> Self {
        Self {
            max_requests: 30,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Millisecond epoch at which the window resets.
    pub reset_at: u64,
    pub limit: u32,
}

impl RateDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        (self.reset_at.saturating_sub(now)).div_ceil(1_000).max(1)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, now_ms())
    }

    pub fn check_at(&self, key: &str, now: u64) -> RateDecision {
        let max = self.config.max_requests;
        let (count, reset_at) = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if window.reset_at <= now {
                    window.count = 0;
                    window.reset_at = now + self.config.window_ms;
                }
                window.count += 1;
                (window.count, window.reset_at)
            },
            Entry::Vacant(vacant) => {
                let window = Window {
                    count: 1,
                    reset_at: now + self.config.window_ms,
                };
                vacant.insert(window);
                (1, window.reset_at)
            },
        };

        RateDecision {
            allowed: count <= max,
            remaining: max.saturating_sub(count),
            reset_at,
            limit: max,
        }
    }

    /// Drop windows that have fully expired.
    pub fn sweep(&self) {
        self.sweep_at(now_ms());
    }

    pub fn sweep_at(&self, now: u64) {
        self.windows.retain(|_, window| window.reset_at > now);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Spawn the periodic sweep; fires every `max(window, 60s)`.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let limiter = self;
        let period = Duration::from_millis(limiter.config.window_ms.max(60_000));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Resolve the client key: first `X-Forwarded-For` hop, else the remote
/// address, else `"unknown"`.
fn client_key(request: &Request) -> String {
    if let Some(xff) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first_hop) = xff.split(',').next()
        && !first_hop.trim().is_empty()
    {
        return first_hop.trim().to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&(decision.reset_at / 1_000).to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}

/// Global API throttle. Denials answer 429 with the `GW-API-004`
/// envelope and a `retryAfter` hint.
pub async fn rate_limit_gate(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if EXEMPT_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let key = client_key(&request);
    let now = now_ms();
    let decision = state.api_limiter.check_at(&key, now);

    if !decision.allowed {
        let definition = state.errors.definition("GW-API-004");
        let retry_after = decision.retry_after_secs(now);
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "ok": false,
                "error": definition.message,
                "code": definition.code,
                "retryAfter": retry_after,
            })),
        )
            .into_response();
        apply_headers(&mut response, &decision);
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}
