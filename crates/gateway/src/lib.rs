//! Gateway: HTTP/WS server, rate limiting, and the chat router.
//!
//! Lifecycle:
//! 1. Construct the domain services (sessions, nodes, usage, worker
//!    transport) and wire them into [`state::GatewayState`]
//! 2. Attach channel adapters to the [`router::Router`]
//! 3. Start the axum server: `/health`, `/nodes/ws`, the admin API
//! 4. Spawn the maintenance sweeps (session expiry, heartbeat monitor,
//!    rate-limit window cleanup)
//!
//! Domain logic lives in the other crates; this one composes them.

pub mod envelope;
pub mod nodes_ws;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod state;

pub use {
    rate_limit::{RateDecision, RateLimitConfig, RateLimiter},
    router::Router,
    state::GatewayState,
};
