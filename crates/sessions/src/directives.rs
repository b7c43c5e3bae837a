//! Per-session standing directives.
//!
//! Directives are short operator-authored instructions prepended to every
//! turn for a session, concatenated in stable ascending priority order
//! (lower number = higher priority).

use std::{
    collections::HashMap,
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use porter_common::now_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub id: String,
    #[serde(rename = "type")]
    pub directive_type: String,
    pub content: String,
    /// Lower sorts first.
    pub priority: i32,
    pub active: bool,
    pub created_at: u64,
}

#[derive(Default)]
pub struct DirectiveManager {
    directives: RwLock<HashMap<String, Vec<Directive>>>,
}

impl DirectiveManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        session_id: &str,
        directive_type: &str,
        content: &str,
        priority: i32,
    ) -> Directive {
        let directive = Directive {
            id: uuid::Uuid::new_v4().to_string(),
            directive_type: directive_type.to_string(),
            content: content.to_string(),
            priority,
            active: true,
            created_at: now_ms(),
        };
        if let Ok(mut map) = self.directives.write() {
            map.entry(session_id.to_string())
                .or_default()
                .push(directive.clone());
        }
        directive
    }

    /// All directives for a session, sorted ascending by priority.
    /// Equal priorities keep insertion order.
    pub fn list(&self, session_id: &str) -> Vec<Directive> {
        let mut directives = self
            .directives
            .read()
            .ok()
            .and_then(|map| map.get(session_id).cloned())
            .unwrap_or_default();
        directives.sort_by_key(|d| d.priority);
        directives
    }

    pub fn set_active(&self, session_id: &str, directive_id: &str, active: bool) -> bool {
        if let Ok(mut map) = self.directives.write()
            && let Some(list) = map.get_mut(session_id)
            && let Some(directive) = list.iter_mut().find(|d| d.id == directive_id)
        {
            directive.active = active;
            return true;
        }
        false
    }

    pub fn remove(&self, session_id: &str, directive_id: &str) -> bool {
        if let Ok(mut map) = self.directives.write()
            && let Some(list) = map.get_mut(session_id)
        {
            let before = list.len();
            list.retain(|d| d.id != directive_id);
            return list.len() != before;
        }
        false
    }

    pub fn clear_session(&self, session_id: &str) {
        if let Ok(mut map) = self.directives.write() {
            map.remove(session_id);
        }
    }

    /// Prompt prefix for a turn: active directives joined by newlines,
    /// followed by a blank line. Empty when no directive is active.
    pub fn prompt_prefix(&self, session_id: &str) -> String {
        let contents: Vec<String> = self
            .list(session_id)
            .into_iter()
            .filter(|d| d.active)
            .map(|d| d.content)
            .collect();
        if contents.is_empty() {
            String::new()
        } else {
            format!("{}\n\n", contents.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_orders_by_priority_then_insertion() {
        let manager = DirectiveManager::new();
        manager.add("s", "tone", "Be terse.", 10);
        manager.add("s", "safety", "Never touch prod.", 1);
        manager.add("s", "tone", "Use metric units.", 10);

        assert_eq!(
            manager.prompt_prefix("s"),
            "Never touch prod.\nBe terse.\nUse metric units.\n\n"
        );
    }

    #[test]
    fn inactive_directives_are_skipped() {
        let manager = DirectiveManager::new();
        let directive = manager.add("s", "tone", "Be terse.", 1);
        assert!(manager.set_active("s", &directive.id, false));
        assert_eq!(manager.prompt_prefix("s"), "");
        assert!(manager.set_active("s", &directive.id, true));
        assert_eq!(manager.prompt_prefix("s"), "Be terse.\n\n");
    }

    #[test]
    fn remove_and_clear() {
        let manager = DirectiveManager::new();
        let directive = manager.add("s", "tone", "x", 1);
        assert!(manager.remove("s", &directive.id));
        assert!(!manager.remove("s", &directive.id));

        manager.add("s", "tone", "y", 1);
        manager.clear_session("s");
        assert!(manager.list("s").is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let manager = DirectiveManager::new();
        manager.add("a", "tone", "for a", 1);
        assert_eq!(manager.prompt_prefix("b"), "");
    }
}
