//! Agent worker wire protocol.
//!
//! Line-delimited JSON over a WebSocket at `/ws`. Requests are correlated
//! to responses by `id`; `stream` frames are side-channel events that do
//! not terminate the request they reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod request_types {
    pub const TURN: &str = "turn";
    pub const RESUME: &str = "resume";
    pub const PING: &str = "ping";
}

pub mod response_types {
    pub const RESPONSE: &str = "response";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";
    pub const STREAM: &str = "stream";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub r#type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decisions: Option<Value>,
}

impl WorkerRequest {
    pub fn turn(id: impl Into<String>, session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            r#type: request_types::TURN.into(),
            id: id.into(),
            session_id: Some(session_id.into()),
            text: Some(text.into()),
            metadata: None,
            decisions: None,
        }
    }

    pub fn resume(id: impl Into<String>, session_id: impl Into<String>, decisions: Value) -> Self {
        Self {
            r#type: request_types::RESUME.into(),
            id: id.into(),
            session_id: Some(session_id.into()),
            text: None,
            metadata: None,
            decisions: Some(decisions),
        }
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            r#type: request_types::PING.into(),
            id: id.into(),
            session_id: None,
            text: None,
            metadata: None,
            decisions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

// ── Turn payloads ────────────────────────────────────────────────────────────

/// Per-call usage reported by the worker; the authoritative billing source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// A worker response indicating human approval is required to proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Decoded `data` of a completed turn or resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}
