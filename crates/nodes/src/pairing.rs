//! Node pairing codes and approved-node records.

use std::collections::HashMap;

use {rand::Rng, serde::Serialize};

use {porter_common::now_ms, porter_protocol::NODE_PAIRING_TTL_MS};

#[derive(Debug, Clone)]
pub struct PairingCode {
    pub code: String,
    pub expires_at: u64,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedNode {
    pub node_id: String,
    pub name: String,
    pub approved_at: u64,
    #[serde(skip_serializing)]
    pub shared_secret: Option<String>,
}

/// In-memory pairing state: one-shot numeric codes plus the set of
/// approved nodes. Owned by the connection manager behind a lock.
#[derive(Default)]
pub struct PairingManager {
    active_codes: HashMap<String, PairingCode>,
    approved: HashMap<String, ApprovedNode>,
}

impl PairingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a six-digit code valid for five minutes. Also sweeps expired
    /// and used entries, best effort.
    pub fn generate(&mut self) -> String {
        self.generate_at(now_ms())
    }

    pub fn generate_at(&mut self, now: u64) -> String {
        self.active_codes
            .retain(|_, entry| !entry.used && now <= entry.expires_at);

        let code = format!("{}", rand::rng().random_range(100_000..=999_999));
        self.active_codes.insert(code.clone(), PairingCode {
            code: code.clone(),
            expires_at: now + NODE_PAIRING_TTL_MS,
            used: false,
        });
        code
    }

    /// One-shot validation: a code validates at most once. Expired entries
    /// are removed on the way out.
    pub fn validate(&mut self, code: &str) -> bool {
        self.validate_at(code, now_ms())
    }

    pub fn validate_at(&mut self, code: &str, now: u64) -> bool {
        let Some(entry) = self.active_codes.get_mut(code) else {
            return false;
        };
        if entry.used {
            return false;
        }
        if now > entry.expires_at {
            self.active_codes.remove(code);
            return false;
        }
        entry.used = true;
        true
    }

    /// True iff some approved node carries this shared secret.
    /// Non-consuming, unlike pairing codes.
    pub fn validate_shared_secret(&self, secret: &str) -> bool {
        self.approved
            .values()
            .any(|node| node.shared_secret.as_deref() == Some(secret))
    }

    pub fn approve(&mut self, node_id: &str, name: &str, shared_secret: Option<String>) {
        self.approved.insert(node_id.to_string(), ApprovedNode {
            node_id: node_id.to_string(),
            name: name.to_string(),
            approved_at: now_ms(),
            shared_secret,
        });
    }

    pub fn remove(&mut self, node_id: &str) -> bool {
        self.approved.remove(node_id).is_some()
    }

    pub fn is_approved(&self, node_id: &str) -> bool {
        self.approved.contains_key(node_id)
    }

    pub fn list_approved(&self) -> Vec<&ApprovedNode> {
        self.approved.values().collect()
    }

    pub fn active_code_count(&self) -> usize {
        self.active_codes.len()
    }
}
