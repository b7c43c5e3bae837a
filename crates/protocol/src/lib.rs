//! Wire protocol definitions for companion nodes and the agent worker.
//!
//! Two grammars live here:
//! - `node` — JSON frames exchanged with companion devices over WebSocket
//!   (`register`, `heartbeat`, `action:request`, ...), with a fail-fast
//!   validator that checks field presence and types before any side effect.
//! - `worker` — line-delimited JSON frames on the persistent worker
//!   transport (`turn`, `resume`, `ping` and their responses).

pub mod capability;
pub mod node;
pub mod worker;

pub use {
    capability::Capability,
    node::{FrameError, ParsedNodeFrame, parse_node_frame, parse_node_frame_str},
};

// ── Timing constants ─────────────────────────────────────────────────────────

/// Companion heartbeat send interval.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// A node silent for longer than this is considered dead.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 90_000;
/// Default timeout for a single companion action round-trip.
pub const ACTION_TIMEOUT_MS: u64 = 30_000;
/// Default timeout for a single worker request.
pub const WORKER_REQUEST_TIMEOUT_MS: u64 = 60_000;
/// A companion must send `register` within this window after connecting.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Node pairing codes are valid for five minutes.
pub const NODE_PAIRING_TTL_MS: u64 = 300_000;
/// Session pairing codes are valid for ten minutes.
pub const SESSION_PAIRING_TTL_MS: u64 = 600_000;

// ── Reconnect policy (worker transport) ──────────────────────────────────────

pub const RECONNECT_BASE_DELAY_MS: u64 = 100;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;
/// Additive jitter, as a fraction of the computed delay.
pub const RECONNECT_JITTER_FRACTION: f64 = 0.2;
