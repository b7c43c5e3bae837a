//! Registry of the local primary node and connected companions.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use serde::Serialize;

use {
    porter_common::{EventBus, now_ms},
    porter_protocol::{Capability, node::PlatformInfo},
};

use crate::error::{Error, Result};

pub const LOCAL_NODE_ID: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Primary,
    Companion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Connecting,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub capabilities: BTreeSet<Capability>,
    pub platform: PlatformInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

impl NodeInfo {
    pub fn companion(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
        platform: PlatformInfo,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            node_type: NodeType::Companion,
            status: NodeStatus::Online,
            capabilities: capabilities.into_iter().collect(),
            platform,
            connected_at: Some(now),
            last_seen: Some(now),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeEvent {
    Connected { node_id: String },
    Disconnected { node_id: String },
    CapabilitiesChanged { node_id: String },
}

/// Tracks the local primary node plus zero or more companions.
///
/// The primary is auto-registered at construction with the locally
/// detected platform and the default capability set; it can never be
/// unregistered.
pub struct NodeRegistry {
    nodes: HashMap<String, NodeInfo>,
    events: Arc<EventBus<NodeEvent>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(LOCAL_NODE_ID.to_string(), NodeInfo {
            id: LOCAL_NODE_ID.to_string(),
            name: "primary".to_string(),
            node_type: NodeType::Primary,
            status: NodeStatus::Online,
            capabilities: Capability::primary_defaults().into_iter().collect(),
            platform: PlatformInfo {
                os: std::env::consts::OS.to_string(),
                version: None,
                arch: Some(std::env::consts::ARCH.to_string()),
            },
            connected_at: Some(now_ms()),
            last_seen: Some(now_ms()),
        });
        Self {
            nodes,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<NodeEvent>> {
        Arc::clone(&self.events)
    }

    pub fn register(&mut self, info: NodeInfo) {
        let node_id = info.id.clone();
        self.nodes.insert(node_id.clone(), info);
        self.events.emit(&NodeEvent::Connected { node_id });
    }

    pub fn unregister(&mut self, node_id: &str) -> Result<NodeInfo> {
        if node_id == LOCAL_NODE_ID {
            return Err(Error::LocalNodeProtected);
        }
        let info = self.nodes.remove(node_id).ok_or(Error::NotFound)?;
        self.events.emit(&NodeEvent::Disconnected {
            node_id: node_id.to_string(),
        });
        Ok(info)
    }

    pub fn update_status(&mut self, node_id: &str, status: NodeStatus) -> Result<()> {
        let node = self.nodes.get_mut(node_id).ok_or(Error::NotFound)?;
        let previous = node.status;
        node.status = status;
        node.last_seen = Some(now_ms());
        match (previous, status) {
            (NodeStatus::Online, NodeStatus::Offline) => {
                self.events.emit(&NodeEvent::Disconnected {
                    node_id: node_id.to_string(),
                });
            },
            (NodeStatus::Offline | NodeStatus::Connecting, NodeStatus::Online) => {
                self.events.emit(&NodeEvent::Connected {
                    node_id: node_id.to_string(),
                });
            },
            _ => {},
        }
        Ok(())
    }

    pub fn update_capabilities(
        &mut self,
        node_id: &str,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Result<()> {
        let node = self.nodes.get_mut(node_id).ok_or(Error::NotFound)?;
        node.capabilities = capabilities.into_iter().collect();
        node.last_seen = Some(now_ms());
        self.events.emit(&NodeEvent::CapabilitiesChanged {
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn all(&self) -> Vec<&NodeInfo> {
        self.nodes.values().collect()
    }

    pub fn online(&self) -> Vec<&NodeInfo> {
        self.nodes
            .values()
            .filter(|n| n.status == NodeStatus::Online)
            .collect()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<&NodeInfo> {
        self.nodes
            .values()
            .filter(|n| n.capabilities.contains(&capability))
            .collect()
    }

    /// Pick the node to route a capability to: the local node when it
    /// qualifies, otherwise the first online companion that does.
    pub fn best_for_capability(&self, capability: Capability) -> Option<&NodeInfo> {
        if let Some(local) = self.nodes.get(LOCAL_NODE_ID)
            && local.status == NodeStatus::Online
            && local.capabilities.contains(&capability)
        {
            return Some(local);
        }
        self.nodes
            .values()
            .find(|n| n.status == NodeStatus::Online && n.capabilities.contains(&capability))
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }
}
