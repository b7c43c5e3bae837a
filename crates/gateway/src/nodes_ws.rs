//! WebSocket endpoint for companion nodes.
//!
//! Handles one connection through its full lifecycle: handshake (the
//! first frame must be a valid, authenticated `register` within the
//! handshake window) → frame loop → teardown. Frame validation failures
//! answer with an `error` frame and leave the socket open; only auth
//! failures close it.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        extract::{
            ConnectInfo, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::Response,
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use porter_protocol::{
    HANDSHAKE_TIMEOUT_MS,
    node::{
        ParsedNodeFrame, RegisterAckPayload, RegisterPayload, error_codes, error_frame,
        parse_node_frame_str, register_ack_frame,
    },
};

use crate::state::GatewayState;

pub async fn nodes_ws_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, addr: SocketAddr) {
    info!(remote = %addr, "node ws: connection opened");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forward serialized frames to the socket.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // ── Handshake ────────────────────────────────────────────────────────
    let register = tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_register(&mut ws_rx, &out_tx),
    )
    .await;

    let payload = match register {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            debug!(remote = %addr, "node ws: closed before register");
            drop(out_tx);
            let _ = write_handle.await;
            return;
        },
        Err(_) => {
            warn!(remote = %addr, "node ws: handshake timeout");
            drop(out_tx);
            let _ = write_handle.await;
            return;
        },
    };

    let node_id = match state
        .nodes
        .handle_register(&payload, out_tx.clone())
        .await
    {
        Ok(outcome) => {
            let ack = register_ack_frame(&outcome.node_id, &RegisterAckPayload {
                success: true,
                message: Some(format!("registered as {}", outcome.node_id)),
                error: None,
                shared_secret: outcome.shared_secret.clone(),
            });
            let _ = out_tx.send(ack.to_string());
            outcome.node_id
        },
        Err(e) => {
            warn!(remote = %addr, error = %e, "node ws: registration refused");
            let ack = register_ack_frame("", &RegisterAckPayload {
                success: false,
                message: None,
                error: Some(e.to_string()),
                shared_secret: None,
            });
            let _ = out_tx.send(ack.to_string());
            drop(out_tx);
            let _ = write_handle.await;
            return;
        },
    };

    // ── Frame loop ───────────────────────────────────────────────────────
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(node_id = %node_id, error = %e, "node ws: read error");
                break;
            },
        };

        match parse_node_frame_str(&text) {
            Ok(frame) => state.nodes.handle_frame(&node_id, frame).await,
            Err(e) => {
                // Invalid frame: tell the peer, keep the socket.
                debug!(node_id = %node_id, error = %e, "node ws: invalid frame");
                let _ = out_tx.send(
                    error_frame(error_codes::INVALID_MESSAGE, &e.to_string(), None).to_string(),
                );
            },
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────
    state.nodes.remove_node(&node_id).await;
    info!(node_id = %node_id, "node ws: connection closed");
    drop(out_tx);
    let _ = write_handle.await;
}

/// Read frames until a valid `register` arrives. Invalid frames are
/// answered with an `error` frame; other valid frames are ignored.
async fn wait_for_register(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    out_tx: &mpsc::UnboundedSender<String>,
) -> Option<RegisterPayload> {
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        };
        match parse_node_frame_str(&text) {
            Ok(ParsedNodeFrame::Register(payload)) => return Some(payload),
            Ok(other) => {
                debug!(frame = ?other, "node ws: non-register frame before handshake");
            },
            Err(e) => {
                let _ = out_tx.send(
                    error_frame(error_codes::INVALID_MESSAGE, &e.to_string(), None).to_string(),
                );
            },
        }
    }
    None
}
