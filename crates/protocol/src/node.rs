//! Companion node frame grammar and validator.
//!
//! Every frame is a JSON object `{type, timestamp, nodeId?, payload?}`.
//! Validation fails fast on a missing or wrong-typed field, before any
//! typed decode; the connection manager answers with an `error` frame and
//! keeps the socket open. Frames with an unknown `type` validate into
//! [`ParsedNodeFrame::Unknown`] so the manager can log and ignore them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use {crate::capability::Capability, porter_common::now_ms};

// ── Frame types ──────────────────────────────────────────────────────────────

pub mod frame_types {
    pub const REGISTER: &str = "register";
    pub const REGISTER_ACK: &str = "register:ack";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_ACK: &str = "heartbeat:ack";
    pub const ACTION_REQUEST: &str = "action:request";
    pub const ACTION_RESPONSE: &str = "action:response";
    pub const CAPABILITY_UPDATE: &str = "capability:update";
    pub const DISCONNECT: &str = "disconnect";
    pub const ERROR: &str = "error";
}

pub mod error_codes {
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const NODE_NOT_FOUND: &str = "NODE_NOT_FOUND";
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub platform: PlatformInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAckPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Secret minted on first pairing so the node can reconnect without a
    /// fresh pairing code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequestPayload {
    pub request_id: String,
    pub action: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponsePayload {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// ── Parsed frames ────────────────────────────────────────────────────────────

/// A validated inbound frame.
#[derive(Debug, Clone)]
pub enum ParsedNodeFrame {
    Register(RegisterPayload),
    RegisterAck {
        node_id: String,
        payload: RegisterAckPayload,
    },
    Heartbeat {
        node_id: String,
    },
    HeartbeatAck {
        node_id: String,
    },
    ActionRequest {
        node_id: String,
        payload: ActionRequestPayload,
    },
    ActionResponse {
        node_id: String,
        payload: ActionResponsePayload,
    },
    CapabilityUpdate {
        node_id: String,
        capabilities: Vec<Capability>,
    },
    Disconnect {
        node_id: String,
        reason: Option<String>,
    },
    Error(ErrorPayload),
    /// Valid envelope, unrecognized `type`. Logged and ignored.
    Unknown {
        frame_type: String,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame: not a JSON object")]
    NotAnObject,

    #[error("invalid frame: malformed JSON: {0}")]
    Json(String),

    #[error("invalid frame: missing or wrong-typed field `{0}`")]
    Field(String),
}

impl FrameError {
    fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }
}

// ── Validation helpers ───────────────────────────────────────────────────────

fn req_str<'a>(map: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a str, FrameError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::field(path))
}

fn req_bool(map: &Map<String, Value>, key: &str, path: &str) -> Result<bool, FrameError> {
    map.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| FrameError::field(path))
}

fn req_obj<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, FrameError> {
    map.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| FrameError::field(path))
}

fn req_array<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Vec<Value>, FrameError> {
    map.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| FrameError::field(path))
}

fn opt_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value, path: &str) -> Result<T, FrameError> {
    serde_json::from_value(value.clone()).map_err(|_| FrameError::field(path.to_string()))
}

// ── Validator ────────────────────────────────────────────────────────────────

/// Validate and decode one inbound frame.
pub fn parse_node_frame(value: &Value) -> Result<ParsedNodeFrame, FrameError> {
    let frame = value.as_object().ok_or(FrameError::NotAnObject)?;

    let frame_type = req_str(frame, "type", "type")?.to_string();
    if !frame.get("timestamp").map(Value::is_number).unwrap_or(false) {
        return Err(FrameError::field("timestamp"));
    }

    let node_id = |path: &str| -> Result<String, FrameError> {
        Ok(req_str(frame, "nodeId", path)?.to_string())
    };

    match frame_type.as_str() {
        frame_types::REGISTER => {
            let payload = req_obj(frame, "payload", "payload")?;
            req_str(payload, "name", "payload.name")?;
            req_array(payload, "capabilities", "payload.capabilities")?;
            let platform = req_obj(payload, "platform", "payload.platform")?;
            req_str(platform, "os", "payload.platform.os")?;
            let decoded: RegisterPayload =
                decode(&Value::Object(payload.clone()), "payload.capabilities")?;
            Ok(ParsedNodeFrame::Register(decoded))
        },
        frame_types::REGISTER_ACK => {
            let id = node_id("nodeId")?;
            let payload = req_obj(frame, "payload", "payload")?;
            req_bool(payload, "success", "payload.success")?;
            let decoded: RegisterAckPayload = decode(&Value::Object(payload.clone()), "payload")?;
            Ok(ParsedNodeFrame::RegisterAck {
                node_id: id,
                payload: decoded,
            })
        },
        frame_types::HEARTBEAT => Ok(ParsedNodeFrame::Heartbeat {
            node_id: node_id("nodeId")?,
        }),
        frame_types::HEARTBEAT_ACK => Ok(ParsedNodeFrame::HeartbeatAck {
            node_id: node_id("nodeId")?,
        }),
        frame_types::ACTION_REQUEST => {
            let id = node_id("nodeId")?;
            let payload = req_obj(frame, "payload", "payload")?;
            req_str(payload, "requestId", "payload.requestId")?;
            req_str(payload, "action", "payload.action")?;
            if !payload.contains_key("params") {
                return Err(FrameError::field("payload.params"));
            }
            let decoded: ActionRequestPayload = decode(&Value::Object(payload.clone()), "payload")?;
            Ok(ParsedNodeFrame::ActionRequest {
                node_id: id,
                payload: decoded,
            })
        },
        frame_types::ACTION_RESPONSE => {
            let id = node_id("nodeId")?;
            let payload = req_obj(frame, "payload", "payload")?;
            req_str(payload, "requestId", "payload.requestId")?;
            req_bool(payload, "success", "payload.success")?;
            let decoded: ActionResponsePayload =
                decode(&Value::Object(payload.clone()), "payload")?;
            Ok(ParsedNodeFrame::ActionResponse {
                node_id: id,
                payload: decoded,
            })
        },
        frame_types::CAPABILITY_UPDATE => {
            let id = node_id("nodeId")?;
            let payload = req_obj(frame, "payload", "payload")?;
            let raw = req_array(payload, "capabilities", "payload.capabilities")?;
            let capabilities: Vec<Capability> =
                decode(&Value::Array(raw.clone()), "payload.capabilities")?;
            Ok(ParsedNodeFrame::CapabilityUpdate {
                node_id: id,
                capabilities,
            })
        },
        frame_types::DISCONNECT => {
            let id = node_id("nodeId")?;
            let reason = frame
                .get("payload")
                .and_then(Value::as_object)
                .and_then(|p| opt_str(p, "reason"));
            Ok(ParsedNodeFrame::Disconnect {
                node_id: id,
                reason,
            })
        },
        frame_types::ERROR => {
            let payload = req_obj(frame, "payload", "payload")?;
            req_str(payload, "code", "payload.code")?;
            req_str(payload, "message", "payload.message")?;
            let decoded: ErrorPayload = decode(&Value::Object(payload.clone()), "payload")?;
            Ok(ParsedNodeFrame::Error(decoded))
        },
        _ => Ok(ParsedNodeFrame::Unknown { frame_type }),
    }
}

/// Parse a raw text frame (one WebSocket text message).
pub fn parse_node_frame_str(text: &str) -> Result<ParsedNodeFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
    parse_node_frame(&value)
}

// ── Outbound frame builders ──────────────────────────────────────────────────

fn frame(frame_type: &str, node_id: Option<&str>, payload: Option<Value>) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), json!(frame_type));
    map.insert("timestamp".into(), json!(now_ms()));
    if let Some(id) = node_id {
        map.insert("nodeId".into(), json!(id));
    }
    if let Some(p) = payload {
        map.insert("payload".into(), p);
    }
    Value::Object(map)
}

pub fn register_frame(payload: &RegisterPayload) -> Value {
    frame(
        frame_types::REGISTER,
        None,
        serde_json::to_value(payload).ok(),
    )
}

pub fn register_ack_frame(node_id: &str, payload: &RegisterAckPayload) -> Value {
    frame(
        frame_types::REGISTER_ACK,
        Some(node_id),
        serde_json::to_value(payload).ok(),
    )
}

pub fn heartbeat_frame(node_id: &str) -> Value {
    frame(frame_types::HEARTBEAT, Some(node_id), None)
}

pub fn heartbeat_ack_frame(node_id: &str) -> Value {
    frame(frame_types::HEARTBEAT_ACK, Some(node_id), None)
}

pub fn action_request_frame(node_id: &str, payload: &ActionRequestPayload) -> Value {
    frame(
        frame_types::ACTION_REQUEST,
        Some(node_id),
        serde_json::to_value(payload).ok(),
    )
}

pub fn action_response_frame(node_id: &str, payload: &ActionResponsePayload) -> Value {
    frame(
        frame_types::ACTION_RESPONSE,
        Some(node_id),
        serde_json::to_value(payload).ok(),
    )
}

pub fn capability_update_frame(node_id: &str, capabilities: &[Capability]) -> Value {
    frame(
        frame_types::CAPABILITY_UPDATE,
        Some(node_id),
        Some(json!({ "capabilities": capabilities })),
    )
}

pub fn disconnect_frame(node_id: &str, reason: Option<&str>) -> Value {
    frame(
        frame_types::DISCONNECT,
        Some(node_id),
        reason.map(|r| json!({ "reason": r })),
    )
}

pub fn error_frame(code: &str, message: &str, details: Option<Value>) -> Value {
    let mut payload = json!({ "code": code, "message": message });
    if let (Some(obj), Some(d)) = (payload.as_object_mut(), details) {
        obj.insert("details".into(), d);
    }
    frame(frame_types::ERROR, None, Some(payload))
}
