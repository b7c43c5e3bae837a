//! Companion node subsystem: pairing, registry, and live connections.
//!
//! A companion is a remote device (phone, second computer) that connects
//! over WebSocket and offers capabilities the primary machine lacks.
//! Pairing uses one-shot six-digit numeric codes (distinct from the
//! six-hex-char *session* pairing codes — separate subsystems, separate
//! TTLs); approved nodes may reconnect with a shared secret.

pub mod error;
pub mod manager;
pub mod pairing;
pub mod registry;

pub use {
    error::{Error, Result},
    manager::{NodeConnectionManager, RegisterOutcome},
    pairing::{ApprovedNode, PairingManager},
    registry::{NodeEvent, NodeInfo, NodeRegistry, NodeStatus, NodeType},
};
