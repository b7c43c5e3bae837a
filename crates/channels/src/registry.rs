use std::{collections::HashMap, sync::Arc};

use crate::adapter::ChannelAdapter;

/// Registry of live channel adapters, keyed by `(channel_type, channel_id)`.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: std::sync::RwLock<HashMap<(String, String), Arc<dyn ChannelAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let key = (
            adapter.channel_type().to_string(),
            adapter.id().to_string(),
        );
        if let Ok(mut map) = self.adapters.write() {
            map.insert(key, adapter);
        }
    }

    pub fn get(&self, channel_type: &str, channel_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .read()
            .ok()?
            .get(&(channel_type.to_string(), channel_id.to_string()))
            .cloned()
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.adapters
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}
