//! The worker connection proper.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, OnceLock, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio::sync::{Mutex, broadcast, mpsc, oneshot},
    tokio_tungstenite::{
        connect_async,
        tungstenite::{client::IntoClientRequest, protocol::Message},
    },
    tracing::{debug, info, warn},
};

use porter_protocol::{
    RECONNECT_BASE_DELAY_MS, RECONNECT_JITTER_FRACTION, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY_MS, WORKER_REQUEST_TIMEOUT_MS,
    worker::{TurnData, WorkerRequest, response_types},
};

use crate::error::{Error, Result};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Worker WebSocket URL, e.g. `ws://127.0.0.1:8765/ws`.
    pub url: String,
    /// Optional `X-Gateway-Token` sent on the upgrade request.
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: bool,
}

impl AgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let request_timeout = std::env::var("WORKER_FETCH_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(WORKER_REQUEST_TIMEOUT_MS));
        Self {
            url: url.into(),
            token: None,
            request_timeout,
            reconnect: true,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// Gave up after the reconnect budget was exhausted.
    MaxReconnects,
}

/// A `stream` frame emitted on the side channel; does not resolve the
/// request it references.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub total_requests: u64,
    /// Sum over completed requests.
    pub total_latency_ms: u64,
    pub pending: usize,
    pub uptime: Option<Duration>,
    pub reconnect_attempts: u32,
}

struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    started_at: Instant,
}

/// Backoff for reconnect attempt `n` (1-based): `min(30s, 100ms · 2^(n-1))`
/// plus additive jitter of up to 20% of that delay, re-capped at 30s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let base = RECONNECT_BASE_DELAY_MS
        .saturating_mul(1u64 << exp)
        .min(RECONNECT_MAX_DELAY_MS);
    let jitter = (base as f64 * RECONNECT_JITTER_FRACTION * rand::random::<f64>()) as u64;
    Duration::from_millis((base + jitter).min(RECONNECT_MAX_DELAY_MS))
}

// ── Connection ───────────────────────────────────────────────────────────────

pub struct AgentConnection {
    config: AgentConfig,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    /// One-flight guard: concurrent `connect()` callers serialize here and
    /// observe the winner's result via the `connected` flag.
    connect_lock: Mutex<()>,
    connected: AtomicBool,
    should_reconnect: AtomicBool,
    reconnecting: AtomicBool,
    /// Connection generation; guards stale read loops from tearing down a
    /// newer connection.
    epoch: AtomicU64,
    attempts: AtomicU32,
    total_requests: AtomicU64,
    total_latency_ms: AtomicU64,
    connected_at: StdMutex<Option<Instant>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    stream_tx: broadcast::Sender<StreamEvent>,
    /// Self-handle for the background read/reconnect tasks.
    weak_self: OnceLock<Weak<AgentConnection>>,
}

impl AgentConnection {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        let (stream_tx, _) = broadcast::channel(256);
        let reconnect = config.reconnect;
        let connection = Arc::new(Self {
            config,
            writer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            connect_lock: Mutex::new(()),
            connected: AtomicBool::new(false),
            should_reconnect: AtomicBool::new(reconnect),
            reconnecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            connected_at: StdMutex::new(None),
            events_tx,
            stream_tx,
            weak_self: OnceLock::new(),
        });
        let _ = connection.weak_self.set(Arc::downgrade(&connection));
        connection
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.weak_self.get().and_then(Weak::upgrade)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    pub fn stream_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.stream_tx.subscribe()
    }

    // ── Connect / disconnect ────────────────────────────────────────────

    /// Establish the connection. At most one attempt is in flight at a
    /// time; concurrent callers await the same outcome.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.connect_inner().await
    }

    /// Single connection attempt. Caller holds `connect_lock`.
    fn connect_inner(&self) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.connect_inner_impl().await })
    }

    async fn connect_inner_impl(&self) -> Result<()> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connect(e.to_string()))?;
        if let Some(token) = &self.config.token {
            let value = token
                .parse()
                .map_err(|_| Error::Connect("invalid gateway token".into()))?;
            request.headers_mut().insert("x-gateway-token", value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
        *self.writer.lock().await = Some(write_tx.clone());

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::Release);
        self.attempts.store(0, Ordering::SeqCst);
        if let Ok(mut connected_at) = self.connected_at.lock() {
            *connected_at = Some(Instant::now());
        }

        // Write loop: forward queued frames to the socket.
        tokio::spawn(async move {
            while let Some(message) = write_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        // Read loop: dispatch responses until the socket dies.
        let Some(connection) = self.strong() else {
            return Err(Error::Connect("connection dropped".into()));
        };
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => connection.handle_text(text.as_ref()).await,
                    Ok(Message::Ping(data)) => {
                        let _ = write_tx.send(Message::Pong(data));
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {},
                    Err(e) => {
                        debug!(error = %e, "worker socket read error");
                        break;
                    },
                }
            }
            connection.handle_disconnect(epoch).await;
        });

        info!(url = %self.config.url, "connected to agent worker");
        let _ = self.events_tx.send(ConnectionEvent::Connected);
        Ok(())
    }

    /// Explicit shutdown: rejects all pending and disables reconnection.
    pub async fn close(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::Release);
        *self.writer.lock().await = None;
        if let Ok(mut connected_at) = self.connected_at.lock() {
            *connected_at = None;
        }
        self.reject_all_pending().await;
    }

    async fn handle_disconnect(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return; // a newer connection owns the state
        }
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        *self.writer.lock().await = None;
        if let Ok(mut connected_at) = self.connected_at.lock() {
            *connected_at = None;
        }
        self.reject_all_pending().await;

        warn!("worker connection lost");
        let _ = self.events_tx.send(ConnectionEvent::Disconnected);

        if self.should_reconnect.load(Ordering::SeqCst)
            && !self.reconnecting.swap(true, Ordering::SeqCst)
        {
            match self.strong() {
                Some(connection) => {
                    tokio::spawn(async move { connection.reconnect_loop().await });
                },
                None => self.reconnecting.store(false, Ordering::SeqCst),
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > RECONNECT_MAX_ATTEMPTS {
                warn!(
                    attempts = RECONNECT_MAX_ATTEMPTS,
                    "reconnect budget exhausted; giving up"
                );
                let _ = self.events_tx.send(ConnectionEvent::MaxReconnects);
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            let delay = reconnect_delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::time::sleep(delay).await;

            if !self.should_reconnect.load(Ordering::SeqCst) {
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            let result = {
                let _guard = self.connect_lock.lock().await;
                if self.is_connected() {
                    Ok(())
                } else {
                    self.connect_inner().await
                }
            };
            match result {
                Ok(()) => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                },
                Err(e) => {
                    debug!(attempt, error = %e, "reconnect attempt failed");
                },
            }
        }
    }

    async fn reject_all_pending(&self) {
        let pending: Vec<PendingRequest> = {
            let mut map = self.pending.lock().await;
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in pending {
            let _ = entry.tx.send(Err(Error::ConnectionLost));
        }
    }

    // ── Requests ────────────────────────────────────────────────────────

    async fn resolve_pending(&self, id: &str, result: Result<Value>) {
        let entry = self.pending.lock().await.remove(id);
        match entry {
            Some(entry) => {
                let latency = entry.started_at.elapsed().as_millis() as u64;
                self.total_latency_ms.fetch_add(latency, Ordering::Relaxed);
                let _ = entry.tx.send(result);
            },
            None => debug!(id = %id, "response for unknown request id"),
        }
    }

    async fn handle_text(&self, text: &str) {
        let response: porter_protocol::worker::WorkerResponse =
            match serde_json::from_str(text) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "unparseable worker frame");
                    return;
                },
            };

        match response.r#type.as_str() {
            response_types::STREAM => {
                let _ = self.stream_tx.send(StreamEvent {
                    id: response.id,
                    data: response.data,
                });
            },
            response_types::RESPONSE | response_types::PONG => {
                if let Some(id) = response.id.as_deref() {
                    self.resolve_pending(id, Ok(response.data.unwrap_or(Value::Null)))
                        .await;
                }
            },
            response_types::ERROR => {
                if let Some(id) = response.id.as_deref() {
                    self.resolve_pending(
                        id,
                        Err(Error::Worker {
                            message: response
                                .error
                                .unwrap_or_else(|| "worker error".to_string()),
                            error_type: response.error_type,
                        }),
                    )
                    .await;
                }
            },
            other => debug!(frame_type = %other, "ignoring unknown worker frame type"),
        }
    }

    /// Issue one request and await the correlated response.
    ///
    /// Connection loss while in flight rejects with "Connection lost" —
    /// never retried here; idempotence is the caller's concern.
    pub async fn send_request(&self, request: WorkerRequest) -> Result<Value> {
        if !self.is_connected() {
            self.connect().await?;
        }

        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), PendingRequest {
            tx,
            started_at: Instant::now(),
        });
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let frame = serde_json::to_string(&request)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        let sent = {
            let writer = self.writer.lock().await;
            writer
                .as_ref()
                .map(|w| w.send(Message::Text(frame.into())).is_ok())
                .unwrap_or(false)
        };
        if !sent {
            self.pending.lock().await.remove(&id);
            return Err(Error::ConnectionLost);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::RequestTimeout)
            },
        }
    }

    /// One conversational turn.
    pub async fn send_turn(
        &self,
        session_id: &str,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<TurnData> {
        let mut request =
            WorkerRequest::turn(uuid::Uuid::new_v4().to_string(), session_id, text);
        request.metadata = metadata;
        let data = self.send_request(request).await?;
        serde_json::from_value(data).map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Deliver approval decisions for an earlier interrupt.
    pub async fn send_resume(
        &self,
        session_id: &str,
        decisions: Value,
    ) -> Result<TurnData> {
        let request =
            WorkerRequest::resume(uuid::Uuid::new_v4().to_string(), session_id, decisions);
        let data = self.send_request(request).await?;
        serde_json::from_value(data).map_err(|e| Error::Protocol(e.to_string()))
    }

    pub async fn ping(&self) -> Result<()> {
        let request = WorkerRequest::ping(uuid::Uuid::new_v4().to_string());
        self.send_request(request).await.map(|_| ())
    }

    pub async fn metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            connected: self.is_connected(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            pending: self.pending.lock().await.len(),
            uptime: self
                .connected_at
                .lock()
                .ok()
                .and_then(|t| t.map(|instant| instant.elapsed())),
            reconnect_attempts: self.attempts.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use {
        futures::{SinkExt, StreamExt},
        serde_json::json,
        tokio::net::TcpListener,
        tokio_tungstenite::accept_async,
    };

    #[test]
    fn first_reconnect_delay_is_base_plus_jitter() {
        for _ in 0..64 {
            let delay = reconnect_delay(1).as_millis() as u64;
            assert!((100..=120).contains(&delay), "delay {delay} out of window");
        }
    }

    #[test]
    fn reconnect_delay_is_capped() {
        for attempt in [9, 10, 30] {
            assert!(reconnect_delay(attempt) <= Duration::from_millis(RECONNECT_MAX_DELAY_MS));
        }
    }

    /// Stub worker: accepts connections, passes each inbound frame to
    /// `respond`, writes whatever frames it returns.
    async fn spawn_worker<F>(respond: F) -> std::net::SocketAddr
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + Clone + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let respond = respond.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut source) = ws.split();
                    while let Some(Ok(message)) = source.next().await {
                        if let Message::Text(text) = message {
                            let request: Value = serde_json::from_str(text.as_ref()).unwrap();
                            for frame in respond(request) {
                                let _ = sink
                                    .send(Message::Text(frame.to_string().into()))
                                    .await;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn echo_worker(request: Value) -> Vec<Value> {
        vec![json!({
            "type": "response",
            "id": request["id"],
            "data": { "text": request["text"] }
        })]
    }

    #[tokio::test]
    async fn turn_round_trip() {
        let addr = spawn_worker(echo_worker).await;
        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));

        let turn = connection
            .send_turn("cli:local:chat", "hello worker", None)
            .await
            .unwrap();
        assert_eq!(turn.text.as_deref(), Some("hello worker"));

        let metrics = connection.metrics().await;
        assert!(metrics.connected);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.pending, 0);
        connection.close().await;
    }

    #[tokio::test]
    async fn concurrent_turns_resolve_by_id_even_out_of_order() {
        // Buffer the first request, answer it only after the second —
        // responses arrive in reverse order of the requests.
        let held: Arc<StdMutex<Option<Value>>> = Arc::new(StdMutex::new(None));
        let addr = spawn_worker(move |request| {
            let mut held = held.lock().unwrap();
            match held.take() {
                None => {
                    *held = Some(request);
                    vec![]
                },
                Some(first) => vec![
                    json!({
                        "type": "response",
                        "id": request["id"],
                        "data": { "text": request["text"] }
                    }),
                    json!({
                        "type": "response",
                        "id": first["id"],
                        "data": { "text": first["text"] }
                    }),
                ],
            }
        })
        .await;

        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        connection.connect().await.unwrap();

        let (first, second) = tokio::join!(
            connection.send_turn("s:1:1", "first", None),
            connection.send_turn("s:1:1", "second", None),
        );
        assert_eq!(first.unwrap().text.as_deref(), Some("first"));
        assert_eq!(second.unwrap().text.as_deref(), Some("second"));
        connection.close().await;
    }

    #[tokio::test]
    async fn stream_frames_do_not_resolve_the_request() {
        let addr = spawn_worker(|request| {
            vec![
                json!({
                    "type": "stream",
                    "id": request["id"],
                    "data": { "delta": "thinking..." }
                }),
                json!({
                    "type": "response",
                    "id": request["id"],
                    "data": { "text": "done" }
                }),
            ]
        })
        .await;

        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        connection.connect().await.unwrap();
        let mut stream_events = connection.stream_events();

        let turn = connection.send_turn("s:1:1", "go", None).await.unwrap();
        assert_eq!(turn.text.as_deref(), Some("done"));

        let event = stream_events.recv().await.unwrap();
        assert_eq!(event.data.unwrap()["delta"], "thinking...");
        connection.close().await;
    }

    #[tokio::test]
    async fn worker_error_rejects_with_message() {
        let addr = spawn_worker(|request| {
            vec![json!({
                "type": "error",
                "id": request["id"],
                "error": "tool exploded",
                "error_type": "AGT-TOOL-001"
            })]
        })
        .await;

        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        let err = connection.send_turn("s:1:1", "go", None).await.unwrap_err();
        assert_eq!(err.to_string(), "tool exploded");
        assert_eq!(err.code(), "AGT-TOOL-001");
        connection.close().await;
    }

    #[tokio::test]
    async fn silent_worker_times_out() {
        let addr = spawn_worker(|_| vec![]).await;
        let config = AgentConfig::new(format!("ws://{addr}/ws"))
            .with_request_timeout(Duration::from_millis(100));
        let connection = AgentConnection::new(config);

        let err = connection.send_turn("s:1:1", "go", None).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout));
        assert_eq!(connection.metrics().await.pending, 0);
        connection.close().await;
    }

    #[tokio::test]
    async fn socket_death_rejects_pending_and_reconnects() {
        // First connection: drop the socket on the first request.
        // Later connections: echo normally.
        let connections_seen = Arc::new(AtomicU32::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::clone(&connections_seen);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let nth = seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut source) = ws.split();
                    while let Some(Ok(message)) = source.next().await {
                        if let Message::Text(text) = message {
                            if nth == 0 {
                                return; // kill the socket mid-request
                            }
                            let request: Value =
                                serde_json::from_str(text.as_ref()).unwrap();
                            let _ = sink
                                .send(Message::Text(
                                    json!({
                                        "type": "response",
                                        "id": request["id"],
                                        "data": { "text": "recovered" }
                                    })
                                    .to_string()
                                    .into(),
                                ))
                                .await;
                        }
                    }
                });
            }
        });

        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        connection.connect().await.unwrap();

        let err = connection.send_turn("s:1:1", "doomed", None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost));
        assert_eq!(err.to_string(), "Connection lost");

        // The transport reconnects on its own; wait for it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !connection.is_connected() {
            assert!(Instant::now() < deadline, "reconnect never happened");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(connections_seen.load(Ordering::SeqCst) >= 2);

        let turn = connection.send_turn("s:1:1", "again", None).await.unwrap();
        assert_eq!(turn.text.as_deref(), Some("recovered"));
        connection.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept exactly one connection, hang up, and stop listening —
        // every reconnect attempt is refused.
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = accept_async(stream).await;
            }
        });

        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        let mut events = connection.events();
        connection.connect().await.unwrap();

        let gave_up = loop {
            match events.recv().await {
                Ok(ConnectionEvent::MaxReconnects) => break true,
                Ok(_) => continue,
                Err(_) => break false,
            }
        };

        assert!(gave_up, "expected a max_reconnects event");
        assert!(!connection.is_connected());
        assert!(connection.metrics().await.reconnect_attempts > RECONNECT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn close_disables_reconnect() {
        let addr = spawn_worker(echo_worker).await;
        let connection = AgentConnection::new(AgentConfig::new(format!("ws://{addr}/ws")));
        connection.connect().await.unwrap();
        connection.close().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!connection.is_connected());
    }
}
