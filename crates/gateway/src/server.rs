//! Axum application wiring and the admin API.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        middleware,
        routing::{any, delete, get, post},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use porter_protocol::NODE_PAIRING_TTL_MS;

use crate::{
    envelope::{failure_from, success},
    nodes_ws::nodes_ws_handler,
    rate_limit::rate_limit_gate,
    state::GatewayState,
};

pub fn build_app(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/nodes/ws", any(nodes_ws_handler))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}/approve", post(approve_session))
        .route("/api/sessions/{id}", delete(destroy_session))
        .route("/api/allowlist", get(list_allowlist))
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/pairing-code", post(create_node_pairing_code))
        .route("/api/usage", get(usage_stats))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit_gate,
        ))
        .with_state(state)
}

pub async fn serve(state: Arc<GatewayState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let metrics = state.agent.metrics().await;
    Json(json!({
        "ok": true,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "worker": {
            "connected": metrics.connected,
            "pending": metrics.pending,
            "totalRequests": metrics.total_requests,
        },
    }))
}

async fn list_sessions(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    match state.sessions.list().await {
        Ok(sessions) => success(json!({ "sessions": sessions })),
        Err(e) => failure_from(&state.errors.create(e.code(), None)),
    }
}

async fn approve_session(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    match state.sessions.manual_approve(&session_id).await {
        Ok(true) => success(json!({ "sessionId": session_id, "paired": true })),
        Ok(false) => failure_from(&state.errors.create("GW-SESS-001", None)),
        Err(e) => failure_from(&state.errors.create(e.code(), None)),
    }
}

async fn destroy_session(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    match state.lifecycle.destroy(&session_id).await {
        Ok(true) => success(json!({ "sessionId": session_id, "destroyed": true })),
        Ok(false) => failure_from(&state.errors.create("GW-SESS-001", None)),
        Err(e) => failure_from(&state.errors.create(e.code(), None)),
    }
}

async fn list_allowlist(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    success(json!({ "allowlist": state.sessions.allowlist_patterns().await }))
}

async fn list_nodes(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let registry = state.nodes.registry();
    let registry = registry.read().await;
    let nodes: Vec<_> = registry.all().into_iter().cloned().collect();
    success(json!({ "nodes": nodes }))
}

async fn create_node_pairing_code(
    State(state): State<Arc<GatewayState>>,
) -> axum::response::Response {
    let pairing = state.nodes.pairing();
    let code = pairing.write().await.generate();
    success(json!({ "code": code, "expiresInMs": NODE_PAIRING_TTL_MS }))
}

#[derive(Deserialize)]
struct UsageQuery {
    from: Option<u64>,
    to: Option<u64>,
}

async fn usage_stats(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<UsageQuery>,
) -> axum::response::Response {
    let range = match (query.from, query.to) {
        (Some(from), Some(to)) => Some((from, to)),
        (Some(from), None) => Some((from, u64::MAX)),
        (None, Some(to)) => Some((0, to)),
        (None, None) => None,
    };
    match serde_json::to_value(state.usage.stats(range)) {
        Ok(stats) => success(json!({ "stats": stats })),
        Err(_) => failure_from(&state.errors.create("GW-INT-001", None)),
    }
}
