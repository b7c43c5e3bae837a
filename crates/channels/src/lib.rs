//! Channel adapter contract.
//!
//! Each messaging surface (Telegram, Discord, Slack, a CLI, a companion
//! app) implements [`ChannelAdapter`] and delivers normalized
//! [`ChannelMessage`]s. The core never constructs channel-specific
//! payloads; replies go back through the originating adapter.

pub mod adapter;
pub mod error;
pub mod loopback;
pub mod message_log;
pub mod registry;
pub mod types;

pub use {
    adapter::{ChannelAdapter, MessageHandler},
    error::{Error, Result},
    loopback::LoopbackAdapter,
    message_log::{MemoryMessageLog, MessageLog, MessageLogEntry},
    registry::AdapterRegistry,
    types::{ChannelMessage, OutboundMessage},
};
