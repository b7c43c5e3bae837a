//! Live companion connections and outstanding action requests.
//!
//! The manager is transport-agnostic: a connection is an outbound sender
//! of serialized frames plus a heartbeat timestamp. The WebSocket glue
//! (socket split, write task, read loop) lives in the gateway crate and
//! drives [`NodeConnectionManager::handle_frame`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    rand::Rng,
    serde_json::Value,
    tokio::{
        sync::{Mutex, RwLock, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use {
    porter_common::now_ms,
    porter_protocol::{
        ACTION_TIMEOUT_MS, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS,
        node::{
            ActionRequestPayload, ActionResponsePayload, ParsedNodeFrame, RegisterPayload,
            action_request_frame, heartbeat_ack_frame,
        },
    },
};

use crate::{
    error::{Error, Result},
    pairing::PairingManager,
    registry::{NodeInfo, NodeRegistry, NodeStatus},
};

struct NodeConnection {
    outbound: mpsc::UnboundedSender<String>,
    last_heartbeat_ms: u64,
}

struct PendingAction {
    node_id: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Result of a successful `register` handshake.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub node_id: String,
    /// Present when the node authenticated with a one-shot pairing code;
    /// the companion stores it for secret-based reconnects.
    pub shared_secret: Option<String>,
}

pub struct NodeConnectionManager {
    registry: Arc<RwLock<NodeRegistry>>,
    pairing: Arc<RwLock<PairingManager>>,
    connections: Mutex<HashMap<String, NodeConnection>>,
    pending: Mutex<HashMap<String, PendingAction>>,
}

fn rand_base36(len: usize) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

impl NodeConnectionManager {
    pub fn new(registry: Arc<RwLock<NodeRegistry>>, pairing: Arc<RwLock<PairingManager>>) -> Self {
        Self {
            registry,
            pairing,
            connections: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<NodeRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn pairing(&self) -> Arc<RwLock<PairingManager>> {
        Arc::clone(&self.pairing)
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Authenticate a `register` frame and admit the connection.
    ///
    /// A pairing code is consumed on use; a shared secret is not. On
    /// code-based auth a fresh secret is minted and returned so the node
    /// can reconnect without re-pairing.
    pub async fn handle_register(
        &self,
        payload: &RegisterPayload,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<RegisterOutcome> {
        let token = payload.auth_token.as_deref().ok_or(Error::AuthFailed)?;

        let minted_secret = {
            let mut pairing = self.pairing.write().await;
            if pairing.validate(token) {
                Some(uuid::Uuid::new_v4().to_string())
            } else if pairing.validate_shared_secret(token) {
                None
            } else {
                return Err(Error::AuthFailed);
            }
        };

        let node_id = format!("companion-{}-{}", now_ms(), rand_base36(9));
        let secret_on_record = minted_secret
            .clone()
            .unwrap_or_else(|| token.to_string());

        {
            let mut registry = self.registry.write().await;
            registry.register(NodeInfo::companion(
                node_id.clone(),
                payload.name.clone(),
                payload.capabilities.iter().copied(),
                payload.platform.clone(),
            ));
        }
        {
            let mut pairing = self.pairing.write().await;
            pairing.approve(&node_id, &payload.name, Some(secret_on_record));
        }
        self.connections.lock().await.insert(node_id.clone(), NodeConnection {
            outbound,
            last_heartbeat_ms: now_ms(),
        });

        info!(node_id = %node_id, name = %payload.name, "companion registered");
        Ok(RegisterOutcome {
            node_id,
            shared_secret: minted_secret,
        })
    }

    // ── Inbound frames ──────────────────────────────────────────────────

    /// Dispatch one validated frame from an authenticated connection.
    pub async fn handle_frame(&self, node_id: &str, frame: ParsedNodeFrame) {
        match frame {
            ParsedNodeFrame::Heartbeat { node_id: claimed } => {
                self.touch_heartbeat(node_id).await;
                if claimed != node_id {
                    debug!(conn = %node_id, claimed = %claimed, "heartbeat with foreign nodeId");
                }
                self.send_to_node(node_id, &heartbeat_ack_frame(node_id))
                    .await;
            },
            ParsedNodeFrame::ActionResponse { payload, .. } => {
                self.complete_action(payload).await;
            },
            ParsedNodeFrame::CapabilityUpdate { capabilities, .. } => {
                let mut registry = self.registry.write().await;
                if let Err(e) = registry.update_capabilities(node_id, capabilities) {
                    warn!(node_id = %node_id, error = %e, "capability update for unknown node");
                }
            },
            ParsedNodeFrame::Disconnect { reason, .. } => {
                info!(node_id = %node_id, reason = ?reason, "companion requested disconnect");
                self.remove_node(node_id).await;
            },
            ParsedNodeFrame::Error(payload) => {
                warn!(node_id = %node_id, code = %payload.code, message = %payload.message, "error frame from companion");
            },
            ParsedNodeFrame::Unknown { frame_type } => {
                debug!(node_id = %node_id, frame_type = %frame_type, "ignoring unknown frame type");
            },
            // register is handled during the handshake; the rest are
            // gateway-to-companion frames a companion should not send.
            other => {
                debug!(node_id = %node_id, frame = ?other, "ignoring unexpected frame");
            },
        }
    }

    pub async fn touch_heartbeat(&self, node_id: &str) {
        if let Some(conn) = self.connections.lock().await.get_mut(node_id) {
            conn.last_heartbeat_ms = now_ms();
        }
    }

    async fn complete_action(&self, payload: ActionResponsePayload) {
        let pending = self.pending.lock().await.remove(&payload.request_id);
        let Some(pending) = pending else {
            debug!(request_id = %payload.request_id, "action response with no pending entry");
            return;
        };
        let result = if payload.success {
            Ok(payload.result.unwrap_or(Value::Null))
        } else {
            Err(Error::ActionFailed(
                payload
                    .error
                    .unwrap_or_else(|| "action failed".to_string()),
            ))
        };
        let _ = pending.tx.send(result);
    }

    // ── Outbound actions ────────────────────────────────────────────────

    /// Send an action to a companion and await its response.
    ///
    /// Correlation is by `requestId` only; concurrent actions to the same
    /// node may complete in any order.
    pub async fn send_action(
        &self,
        node_id: &str,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let outbound = {
            let connections = self.connections.lock().await;
            let conn = connections.get(node_id).ok_or(Error::NotConnected)?;
            conn.outbound.clone()
        };

        let timeout = timeout.unwrap_or(Duration::from_millis(ACTION_TIMEOUT_MS));
        let request_id = format!("action-{}-{}", now_ms(), rand_base36(6));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), PendingAction {
            node_id: node_id.to_string(),
            tx,
        });

        let frame = action_request_frame(node_id, &ActionRequestPayload {
            request_id: request_id.clone(),
            action: action.to_string(),
            params,
            timeout: Some(timeout.as_millis() as u64),
        });
        let serialized = frame.to_string();
        if outbound.send(serialized).is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Pending entry dropped: the node disconnected mid-flight.
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(Error::ActionTimeout)
            },
        }
    }

    /// Route an action to any connected node offering `capability`.
    ///
    /// The local primary handles its capabilities in-process, so routing
    /// considers companions only; with none eligible this fails with the
    /// missing-capability error.
    pub async fn send_action_by_capability(
        &self,
        capability: porter_protocol::Capability,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let candidates: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .by_capability(capability)
                .into_iter()
                .filter(|n| n.status == NodeStatus::Online)
                .map(|n| n.id.clone())
                .collect()
        };
        let mut target = None;
        for node_id in candidates {
            if self.is_connected(&node_id).await {
                target = Some(node_id);
                break;
            }
        }
        let Some(node_id) = target else {
            return Err(Error::MissingCapability(capability));
        };
        self.send_action(&node_id, action, params, timeout).await
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Tear down a connection: reject its pending actions, flip the
    /// registry status to offline, and drop the outbound sender (which
    /// ends the write task and closes the socket).
    pub async fn remove_node(&self, node_id: &str) {
        let removed = self.connections.lock().await.remove(node_id);
        if removed.is_none() {
            return;
        }

        let rejected: Vec<PendingAction> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.node_id == node_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for action in rejected {
            let _ = action.tx.send(Err(Error::Disconnected));
        }

        let mut registry = self.registry.write().await;
        if let Err(e) = registry.update_status(node_id, NodeStatus::Offline) {
            debug!(node_id = %node_id, error = %e, "offline transition for unknown node");
        }
        info!(node_id = %node_id, "companion connection removed");
    }

    /// Remove every connection whose last heartbeat is older than the
    /// timeout at `now`.
    pub async fn sweep_stale(&self) -> Vec<String> {
        self.sweep_stale_at(now_ms()).await
    }

    pub async fn sweep_stale_at(&self, now: u64) -> Vec<String> {
        let stale: Vec<String> = {
            let connections = self.connections.lock().await;
            connections
                .iter()
                .filter(|(_, c)| now.saturating_sub(c.last_heartbeat_ms) > HEARTBEAT_TIMEOUT_MS)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for node_id in &stale {
            warn!(node_id = %node_id, "heartbeat timeout; removing companion");
            self.remove_node(node_id).await;
        }
        stale
    }

    /// Spawn the heartbeat monitor, one tick per heartbeat interval.
    pub fn spawn_heartbeat_monitor(self: Arc<Self>) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_stale().await;
            }
        })
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub async fn is_connected(&self, node_id: &str) -> bool {
        self.connections.lock().await.contains_key(node_id)
    }

    pub async fn connected_node_ids(&self) -> Vec<String> {
        self.connections.lock().await.keys().cloned().collect()
    }

    pub async fn pending_action_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn send_to_node(&self, node_id: &str, frame: &Value) {
        if let Some(conn) = self.connections.lock().await.get(node_id) {
            let _ = conn.outbound.send(frame.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_protocol::{
        Capability,
        node::{PlatformInfo, parse_node_frame_str},
    };

    fn manager() -> Arc<NodeConnectionManager> {
        Arc::new(NodeConnectionManager::new(
            Arc::new(RwLock::new(NodeRegistry::new())),
            Arc::new(RwLock::new(PairingManager::new())),
        ))
    }

    fn register_payload(token: &str) -> RegisterPayload {
        RegisterPayload {
            name: "kitchen-ipad".into(),
            capabilities: vec![Capability::AudioOutput],
            platform: PlatformInfo {
                os: "ios".into(),
                version: Some("18.2".into()),
                arch: None,
            },
            auth_token: Some(token.into()),
        }
    }

    async fn registered_node(
        manager: &Arc<NodeConnectionManager>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let code = manager.pairing().write().await.generate();
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = manager
            .handle_register(&register_payload(&code), tx)
            .await
            .unwrap();
        (outcome.node_id, rx)
    }

    #[tokio::test]
    async fn register_with_pairing_code_mints_secret() {
        let manager = manager();
        let (node_id, _rx) = registered_node(&manager).await;

        assert!(node_id.starts_with("companion-"));
        assert!(manager.is_connected(&node_id).await);
        let registry = manager.registry();
        let registry = registry.read().await;
        let info = registry.get(&node_id).unwrap();
        assert_eq!(info.status, NodeStatus::Online);
        assert!(info.capabilities.contains(&Capability::AudioOutput));
    }

    #[tokio::test]
    async fn pairing_code_is_consumed_but_secret_is_not() {
        let manager = manager();
        let code = manager.pairing().write().await.generate();

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = manager
            .handle_register(&register_payload(&code), tx)
            .await
            .unwrap();
        let secret = outcome.shared_secret.expect("secret minted on code auth");

        // Reusing the code fails; the minted secret works repeatedly.
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            manager.handle_register(&register_payload(&code), tx).await,
            Err(Error::AuthFailed)
        ));
        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            let reconnect = manager
                .handle_register(&register_payload(&secret), tx)
                .await
                .unwrap();
            assert!(reconnect.shared_secret.is_none());
        }
    }

    #[tokio::test]
    async fn register_with_bad_token_fails() {
        let manager = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            manager.handle_register(&register_payload("000000"), tx).await,
            Err(Error::AuthFailed)
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut no_token = register_payload("x");
        no_token.auth_token = None;
        assert!(matches!(
            manager.handle_register(&no_token, tx).await,
            Err(Error::AuthFailed)
        ));
    }

    #[tokio::test]
    async fn action_round_trip_resolves_with_result() {
        let manager = manager();
        let (node_id, mut rx) = registered_node(&manager).await;

        let manager_clone = Arc::clone(&manager);
        let node_id_clone = node_id.clone();
        // Simulated companion: answer the first action request.
        let companion = tokio::spawn(async move {
            let raw = rx.recv().await.expect("action request frame");
            let frame = parse_node_frame_str(&raw).unwrap();
            let ParsedNodeFrame::ActionRequest { payload, .. } = frame else {
                panic!("expected action:request, got {frame:?}");
            };
            assert_eq!(payload.action, "play");
            manager_clone
                .handle_frame(
                    &node_id_clone,
                    ParsedNodeFrame::ActionResponse {
                        node_id: node_id_clone.clone(),
                        payload: ActionResponsePayload {
                            request_id: payload.request_id,
                            success: true,
                            result: Some(serde_json::json!("ok")),
                            error: None,
                        },
                    },
                )
                .await;
        });

        let result = manager
            .send_action(
                &node_id,
                "play",
                serde_json::json!({ "path": "/a" }),
                Some(Duration::from_millis(1_000)),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("ok"));
        assert_eq!(manager.pending_action_count().await, 0);
        companion.await.unwrap();
    }

    #[tokio::test]
    async fn failed_action_rejects_with_companion_error() {
        let manager = manager();
        let (node_id, mut rx) = registered_node(&manager).await;

        let manager_clone = Arc::clone(&manager);
        let node_id_clone = node_id.clone();
        tokio::spawn(async move {
            let raw = rx.recv().await.expect("action request frame");
            let ParsedNodeFrame::ActionRequest { payload, .. } =
                parse_node_frame_str(&raw).unwrap()
            else {
                panic!("expected action:request");
            };
            manager_clone
                .handle_frame(
                    &node_id_clone,
                    ParsedNodeFrame::ActionResponse {
                        node_id: node_id_clone.clone(),
                        payload: ActionResponsePayload {
                            request_id: payload.request_id,
                            success: false,
                            result: None,
                            error: Some("speaker busy".into()),
                        },
                    },
                )
                .await;
        });

        let err = manager
            .send_action(
                &node_id,
                "play",
                serde_json::json!({}),
                Some(Duration::from_millis(1_000)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActionFailed(ref m) if m == "speaker busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_action_times_out() {
        let manager = manager();
        let (node_id, _rx) = registered_node(&manager).await;

        let err = manager
            .send_action(
                &node_id,
                "play",
                serde_json::json!({}),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActionTimeout));
        assert_eq!(err.to_string(), "Action timeout");
        assert_eq!(manager.pending_action_count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_sweep_removes_silent_nodes_and_rejects_pending() {
        let manager = manager();
        let (node_id, _rx) = registered_node(&manager).await;

        // Start an action that will still be pending when the sweep fires.
        let manager_clone = Arc::clone(&manager);
        let node_id_clone = node_id.clone();
        let in_flight = tokio::spawn(async move {
            manager_clone
                .send_action(
                    &node_id_clone,
                    "play",
                    serde_json::json!({}),
                    Some(Duration::from_secs(30)),
                )
                .await
        });
        tokio::task::yield_now().await;
        while manager.pending_action_count().await == 0 {
            tokio::task::yield_now().await;
        }

        // 91 seconds of silence, then one monitor tick.
        let removed = manager
            .sweep_stale_at(now_ms() + HEARTBEAT_TIMEOUT_MS + 1_000)
            .await;
        assert_eq!(removed, vec![node_id.clone()]);

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert_eq!(err.to_string(), "node disconnected");

        // The node is offline in the registry and fresh sends are refused.
        {
            let registry = manager.registry();
            let registry = registry.read().await;
            assert_eq!(registry.get(&node_id).unwrap().status, NodeStatus::Offline);
        }
        let err = manager
            .send_action(&node_id, "play", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(err.to_string(), "node not connected");
    }

    #[tokio::test]
    async fn heartbeat_frame_is_acked_and_refreshes_liveness() {
        let manager = manager();
        let (node_id, mut rx) = registered_node(&manager).await;

        manager
            .handle_frame(&node_id, ParsedNodeFrame::Heartbeat {
                node_id: node_id.clone(),
            })
            .await;

        let raw = rx.recv().await.expect("heartbeat ack");
        assert!(matches!(
            parse_node_frame_str(&raw).unwrap(),
            ParsedNodeFrame::HeartbeatAck { .. }
        ));

        // A fresh heartbeat keeps the node out of the sweep.
        assert!(manager.sweep_stale().await.is_empty());
        assert!(manager.is_connected(&node_id).await);
    }

    #[tokio::test]
    async fn capability_routing_picks_a_connected_companion() {
        let manager = manager();
        let (node_id, mut rx) = registered_node(&manager).await;

        let manager_clone = Arc::clone(&manager);
        let node_id_clone = node_id.clone();
        tokio::spawn(async move {
            let raw = rx.recv().await.expect("action request frame");
            let ParsedNodeFrame::ActionRequest { payload, .. } =
                parse_node_frame_str(&raw).unwrap()
            else {
                panic!("expected action:request");
            };
            manager_clone
                .handle_frame(
                    &node_id_clone,
                    ParsedNodeFrame::ActionResponse {
                        node_id: node_id_clone.clone(),
                        payload: ActionResponsePayload {
                            request_id: payload.request_id,
                            success: true,
                            result: Some(serde_json::json!("played")),
                            error: None,
                        },
                    },
                )
                .await;
        });

        let result = manager
            .send_action_by_capability(
                Capability::AudioOutput,
                "play",
                serde_json::json!({ "path": "/a" }),
                Some(Duration::from_millis(1_000)),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("played"));

        // No connected node offers the camera.
        let err = manager
            .send_action_by_capability(
                Capability::Camera,
                "snap",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCapability(Capability::Camera)));
        assert_eq!(err.code(), "GW-NODE-003");
    }

    #[tokio::test]
    async fn disconnect_frame_tears_down_the_connection() {
        let manager = manager();
        let (node_id, _rx) = registered_node(&manager).await;

        manager
            .handle_frame(&node_id, ParsedNodeFrame::Disconnect {
                node_id: node_id.clone(),
                reason: Some("user logout".into()),
            })
            .await;

        assert!(!manager.is_connected(&node_id).await);
    }
}
