use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Authoritative session value object.
///
/// `session_id` is a pure function of `(channel_type, channel_id, chat_id)`;
/// two channel events with the same triple refer to the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub channel_type: String,
    pub channel_id: String,
    pub chat_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Millisecond epoch.
    pub created_at: u64,
    /// Monotonically non-decreasing; always >= `created_at`.
    pub last_activity_at: u64,
    pub paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code_expires_at: Option<u64>,
}

impl Session {
    /// True while a pairing code is outstanding and unexpired at `now`.
    pub fn has_live_pairing_code(&self, now_ms: u64) -> bool {
        match (&self.pairing_code, self.pairing_code_expires_at) {
            (Some(_), Some(expires_at)) => now_ms <= expires_at,
            _ => false,
        }
    }

    pub fn clear_pairing_code(&mut self) {
        self.pairing_code = None;
        self.pairing_code_expires_at = None;
    }

    pub fn touch(&mut self, now_ms: u64) {
        if now_ms > self.last_activity_at {
            self.last_activity_at = now_ms;
        }
    }
}

fn check_component(component: &str) -> Result<()> {
    if component.contains(':') {
        return Err(Error::InvalidSessionId {
            component: component.to_string(),
        });
    }
    Ok(())
}

/// Build a session id. Components must not contain `:`.
pub fn make_session_id(channel_type: &str, channel_id: &str, chat_id: &str) -> Result<String> {
    check_component(channel_type)?;
    check_component(channel_id)?;
    check_component(chat_id)?;
    Ok(format!("{channel_type}:{channel_id}:{chat_id}"))
}

/// Split a session id back into its `(channel_type, channel_id, chat_id)` triple.
pub fn parse_session_id(session_id: &str) -> Result<(&str, &str, &str)> {
    let mut parts = session_id.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(ct), Some(cid), Some(chat), None)
            if !ct.is_empty() && !cid.is_empty() && !chat.is_empty() =>
        {
            Ok((ct, cid, chat))
        },
        _ => Err(Error::InvalidSessionId {
            component: session_id.to_string(),
        }),
    }
}
