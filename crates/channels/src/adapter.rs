use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{ChannelMessage, OutboundMessage},
};

/// Callback invoked for each normalized inbound message. Handlers must be
/// cheap; long work is queued onto the router's own tasks.
pub type MessageHandler = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// Core adapter trait. Each messaging platform implements this.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel kind (e.g. "telegram", "discord", "cli").
    fn channel_type(&self) -> &str;

    /// Account/bot identifier within the channel kind.
    fn id(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Deliver a reply to a chat on this channel.
    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<()>;

    /// Install the inbound-message handler. At most one handler is active;
    /// a second call replaces the first.
    fn on_message(&self, handler: MessageHandler);
}
