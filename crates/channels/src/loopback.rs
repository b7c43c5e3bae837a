//! In-process adapter used by tests and the CLI's local echo mode.
//!
//! Inbound messages are injected programmatically; outbound sends are
//! recorded and can be inspected or awaited.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use {async_trait::async_trait, tokio::sync::Notify};

use crate::{
    adapter::{ChannelAdapter, MessageHandler},
    error::{Error, Result},
    types::{ChannelMessage, OutboundMessage},
};

pub struct LoopbackAdapter {
    channel_type: String,
    id: String,
    connected: AtomicBool,
    handler: RwLock<Option<MessageHandler>>,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    sent_notify: Notify,
    next_message_id: AtomicU64,
}

impl LoopbackAdapter {
    pub fn new(channel_type: impl Into<String>, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            channel_type: channel_type.into(),
            id: id.into(),
            connected: AtomicBool::new(false),
            handler: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            next_message_id: AtomicU64::new(1),
        })
    }

    /// Inject an inbound message as if the channel delivered it.
    pub fn inject(&self, chat_id: &str, user_id: &str, text: &str) -> String {
        let message_id = format!(
            "m{}",
            self.next_message_id.fetch_add(1, Ordering::Relaxed)
        );
        let message = ChannelMessage {
            id: message_id.clone(),
            channel_type: self.channel_type.clone(),
            channel_id: self.id.clone(),
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            text: text.to_string(),
            timestamp: porter_common::now_ms(),
            metadata: None,
            reply_to: None,
        };
        let handler = self.handler.read().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(message);
        }
        message_id
    }

    /// Everything sent through this adapter so far, in order.
    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Wait until at least `count` messages have been sent.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<(String, OutboundMessage)> {
        loop {
            let notified = self.sent_notify.notified();
            let current = self.sent();
            if current.len() >= count {
                return current;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((chat_id.to_string(), message.clone()));
        }
        self.sent_notify.notify_waiters();
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        if let Ok(mut slot) = self.handler.write() {
            *slot = Some(handler);
        }
    }
}
