//! Persistent transport to the agent worker.
//!
//! One long-lived WebSocket multiplexes `turn`, `resume`, and `ping`
//! requests; correlation is by request id only, and responses may arrive
//! in any order. On close, every pending request is rejected and the
//! connection re-established with capped exponential backoff plus jitter.

pub mod connection;
pub mod error;

pub use {
    connection::{AgentConfig, AgentConnection, ConnectionEvent, ConnectionMetrics, StreamEvent},
    error::{Error, Result},
};
