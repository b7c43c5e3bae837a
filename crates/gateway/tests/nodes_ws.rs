//! Companion WebSocket lifecycle against a live gateway listener.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio_tungstenite::{connect_async, tungstenite::protocol::Message},
};

use {
    porter_agent::{AgentConfig, AgentConnection},
    porter_channels::MemoryMessageLog,
    porter_gateway::{GatewayState, server::build_app},
    porter_sessions::{LifecycleConfig, MemorySessionStore, SessionManagerConfig},
};

async fn spawn_gateway() -> (Arc<GatewayState>, SocketAddr) {
    let agent = AgentConnection::new(AgentConfig::new("ws://127.0.0.1:9/ws"));
    let state = GatewayState::new(
        SessionManagerConfig::default(),
        LifecycleConfig::default(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryMessageLog::new()),
        agent,
    );

    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    (state, addr)
}

fn register_frame(code: &str) -> String {
    json!({
        "type": "register",
        "timestamp": porter_common::now_ms(),
        "payload": {
            "name": "test-companion",
            "capabilities": ["audio_output"],
            "platform": { "os": "ios", "version": "18.0" },
            "authToken": code
        }
    })
    .to_string()
}

async fn next_frame(
    source: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), source.next())
            .await
            .expect("frame timeout")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_ref()).unwrap();
        }
    }
}

#[tokio::test]
async fn register_heartbeat_action_and_validation_flow() {
    let (state, addr) = spawn_gateway().await;

    let code = {
        let pairing = state.nodes.pairing();
        let code = pairing.write().await.generate();
        code
    };

    let (ws, _) = connect_async(format!("ws://{addr}/nodes/ws"))
        .await
        .expect("node connect");
    let (mut sink, mut source) = ws.split();

    // ── Register ─────────────────────────────────────────────────────────
    sink.send(Message::Text(register_frame(&code).into()))
        .await
        .unwrap();
    let ack = next_frame(&mut source).await;
    assert_eq!(ack["type"], "register:ack");
    assert_eq!(ack["payload"]["success"], true);
    let node_id = ack["nodeId"].as_str().unwrap().to_string();
    assert!(node_id.starts_with("companion-"));
    let shared_secret = ack["payload"]["sharedSecret"].as_str().unwrap().to_string();

    {
        let registry = state.nodes.registry();
        let registry = registry.read().await;
        let info = registry.get(&node_id).expect("registered node");
        assert_eq!(info.name, "test-companion");
    }

    // ── Invalid frame: error reply, socket stays open ────────────────────
    sink.send(Message::Text(
        json!({ "type": "heartbeat" }).to_string().into(),
    ))
    .await
    .unwrap();
    let error = next_frame(&mut source).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "INVALID_MESSAGE");

    // ── Heartbeat ────────────────────────────────────────────────────────
    sink.send(Message::Text(
        json!({
            "type": "heartbeat",
            "timestamp": porter_common::now_ms(),
            "nodeId": node_id
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();
    let ack = next_frame(&mut source).await;
    assert_eq!(ack["type"], "heartbeat:ack");

    // ── Action round trip, driven from the gateway side ──────────────────
    let state_clone = Arc::clone(&state);
    let node_id_clone = node_id.clone();
    let action = tokio::spawn(async move {
        state_clone
            .nodes
            .send_action(
                &node_id_clone,
                "play",
                json!({ "path": "/a" }),
                Some(Duration::from_secs(5)),
            )
            .await
    });

    let request = next_frame(&mut source).await;
    assert_eq!(request["type"], "action:request");
    assert_eq!(request["payload"]["action"], "play");
    let request_id = request["payload"]["requestId"].as_str().unwrap();

    sink.send(Message::Text(
        json!({
            "type": "action:response",
            "timestamp": porter_common::now_ms(),
            "nodeId": node_id,
            "payload": { "requestId": request_id, "success": true, "result": "ok" }
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    let result = action.await.unwrap().unwrap();
    assert_eq!(result, json!("ok"));

    // ── Reconnect with the minted shared secret ──────────────────────────
    drop(sink);
    drop(source);
    let (ws, _) = connect_async(format!("ws://{addr}/nodes/ws"))
        .await
        .expect("reconnect");
    let (mut sink, mut source) = ws.split();
    sink.send(Message::Text(register_frame(&shared_secret).into()))
        .await
        .unwrap();
    let ack = next_frame(&mut source).await;
    assert_eq!(ack["payload"]["success"], true);
    // Secret-based reconnects do not mint a new secret.
    assert!(ack["payload"].get("sharedSecret").is_none());
}

#[tokio::test]
async fn register_with_bad_code_is_refused_and_closed() {
    let (_state, addr) = spawn_gateway().await;

    let (ws, _) = connect_async(format!("ws://{addr}/nodes/ws"))
        .await
        .expect("node connect");
    let (mut sink, mut source) = ws.split();

    sink.send(Message::Text(register_frame("999999").into()))
        .await
        .unwrap();
    let ack = next_frame(&mut source).await;
    assert_eq!(ack["type"], "register:ack");
    assert_eq!(ack["payload"]["success"], false);
    assert!(
        ack["payload"]["error"]
            .as_str()
            .unwrap()
            .contains("authentication")
    );

    // The gateway closes the socket after a refused registration.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match source.next().await {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                _ => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket was not closed");
}
