//! Structured error catalog shared by the gateway and agent-facing crates.
//!
//! Every failure that crosses a component boundary carries a stable code of
//! the form `[SERVICE]-[CATEGORY]-[NNN]` plus an HTTP status and a retryable
//! flag. The catalog is immutable after construction; unknown codes resolve
//! to a synthetic 500 definition so lookups never fail.

use std::{borrow::Cow, collections::HashMap};

use serde::Serialize;

// ── Definitions ─────────────────────────────────────────────────────────────

/// One entry in the error catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDefinition {
    pub code: Cow<'static, str>,
    pub message: &'static str,
    #[serde(rename = "httpStatus")]
    pub http_status: u16,
    pub retryable: bool,
}

/// A structured error minted from the catalog.
///
/// Carries everything the HTTP envelope and the retry policy need. The
/// `details` value is opaque to the core and passed through to the caller.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
    #[serde(rename = "httpStatus")]
    pub http_status: u16,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Immutable catalog of error definitions, seeded at construction.
///
/// Constructed once at startup and threaded through dependency injection;
/// tests build a fresh registry per case.
pub struct ErrorRegistry {
    definitions: HashMap<&'static str, ErrorDefinition>,
}

macro_rules! def {
    ($map:ident, $code:literal, $message:literal, $status:literal, $retryable:literal) => {
        $map.insert($code, ErrorDefinition {
            code: Cow::Borrowed($code),
            message: $message,
            http_status: $status,
            retryable: $retryable,
        });
    };
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRegistry {
    pub fn new() -> Self {
        let mut map = HashMap::new();

        // Gateway: admission
        def!(map, "GW-AUTH-001", "Invalid pairing code", 403, false);
        def!(map, "GW-AUTH-002", "Pairing code expired", 403, false);
        def!(map, "GW-AUTH-003", "Session is not paired", 403, false);
        def!(map, "GW-AUTH-004", "Sender is not in the allowlist", 403, false);

        // Gateway: sessions
        def!(map, "GW-SESS-001", "Session not found", 404, false);
        def!(map, "GW-SESS-002", "Session expired", 410, false);
        def!(map, "GW-SESS-003", "Malformed session id", 400, false);

        // Gateway: channels
        def!(map, "GW-CHAN-001", "Channel not found", 404, false);
        def!(map, "GW-CHAN-002", "Channel adapter is not connected", 503, false);
        def!(map, "GW-CHAN-003", "Unsupported channel operation", 400, false);
        def!(map, "GW-CHAN-004", "Channel send failed", 502, true);

        // Gateway: companion nodes
        def!(map, "GW-NODE-001", "Node not found", 404, false);
        def!(map, "GW-NODE-002", "Node disconnected", 502, false);
        def!(map, "GW-NODE-003", "Node lacks the required capability", 400, false);
        def!(map, "GW-NODE-004", "Node action timed out", 504, true);
        def!(map, "GW-NODE-005", "Node action failed", 502, false);
        def!(map, "GW-NODE-006", "Cannot unregister the local node", 400, false);

        // Gateway: scheduling
        def!(map, "GW-SCHED-001", "Scheduler unavailable", 503, true);
        def!(map, "GW-SCHED-002", "Scheduled task not found", 404, false);

        // Gateway: worker transport / API
        def!(map, "GW-API-001", "Agent worker unavailable", 503, true);
        def!(map, "GW-API-002", "Agent worker timed out", 504, true);
        def!(map, "GW-API-003", "Bad request", 400, false);
        def!(map, "GW-API-004", "Rate limit exceeded", 429, false);

        // Gateway: internal
        def!(map, "GW-INT-001", "Internal error", 500, false);

        // Agent worker side, surfaced unchanged through the transport
        def!(map, "AGT-SKILL-001", "Skill not found", 404, false);
        def!(map, "AGT-SKILL-002", "Skill execution failed", 500, false);
        def!(map, "AGT-MEM-001", "Memory store unavailable", 503, true);
        def!(map, "AGT-TOOL-001", "Tool execution failed", 500, false);
        def!(map, "AGT-TOOL-002", "Tool not permitted", 403, false);
        def!(map, "AGT-API-001", "Model provider unavailable", 503, true);
        def!(map, "AGT-API-002", "Model provider timed out", 504, true);
        def!(map, "AGT-INT-001", "Agent internal error", 500, false);

        Self { definitions: map }
    }

    /// Look up a definition. Unknown codes yield a synthetic 500 definition
    /// with the caller's code preserved.
    pub fn definition(&self, code: &str) -> ErrorDefinition {
        match self.definitions.get(code) {
            Some(def) => def.clone(),
            None => ErrorDefinition {
                code: Cow::Owned(code.to_string()),
                message: "Unknown error",
                http_status: 500,
                retryable: false,
            },
        }
    }

    /// Mint a structured error for `code`, attaching optional details.
    pub fn create(&self, code: &str, details: Option<serde_json::Value>) -> GatewayError {
        match self.definitions.get(code) {
            Some(def) => GatewayError {
                code: def.code.to_string(),
                message: def.message.to_string(),
                http_status: def.http_status,
                retryable: def.retryable,
                details,
            },
            None => GatewayError {
                code: code.to_string(),
                message: "Unknown error".to_string(),
                http_status: 500,
                retryable: false,
                details,
            },
        }
    }

    /// Mint an error with a message overriding the catalog default.
    pub fn create_with_message(
        &self,
        code: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> GatewayError {
        let mut err = self.create(code, details);
        err.message = message.into();
        err
    }

    pub fn is_retryable(&self, code: &str) -> bool {
        self.definitions.get(code).map(|d| d.retryable).unwrap_or(false)
    }

    pub fn known(&self, code: &str) -> bool {
        self.definitions.contains_key(code)
    }
}
