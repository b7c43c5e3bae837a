//! Shared types and utilities used across all porter crates.

pub mod error;
pub mod events;
pub mod time;

pub use {
    error::{ErrorDefinition, ErrorRegistry, GatewayError},
    events::{EventBus, Subscription},
    time::now_ms,
};
