//! Persistent admission allowlist with wildcard patterns.
//!
//! Pattern language: `*` matches any run of non-`:` characters, `?` matches
//! a single character; matches are anchored at both ends. Patterns are
//! compiled to a regex once and cached beside the source string; user input
//! is never interpreted as regex directly.
//!
//! File format: `{ "allowlist": [pattern, ...], "lastUpdated": ISO8601 }`.
//! A missing file or invalid JSON loads as an empty list.

use std::{
    fs,
    path::{Path, PathBuf},
};

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Option<Regex>,
}

fn compile_wildcard(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str("[^:]*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&ch.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

impl CompiledPattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let regex = compile_wildcard(&source);
        Self { source, regex }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(candidate),
            None => self.source == candidate,
        }
    }
}

// ── Allowlist ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    patterns: Vec<CompiledPattern>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(CompiledPattern::new).collect(),
        }
    }

    /// True if any pattern matches `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(candidate))
    }

    /// True if `entry` is present verbatim (no wildcard interpretation).
    pub fn contains_exact(&self, entry: &str) -> bool {
        self.patterns.iter().any(|p| p.source == entry)
    }

    /// Add a pattern; returns false if already present verbatim.
    pub fn add(&mut self, pattern: impl Into<String>) -> bool {
        let pattern = pattern.into();
        if self.contains_exact(&pattern) {
            return false;
        }
        self.patterns.push(CompiledPattern::new(pattern));
        true
    }

    /// Remove a pattern by its source text; returns true if removed.
    pub fn remove(&mut self, pattern: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.source != pattern);
        self.patterns.len() != before
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.source.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ── File persistence ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct AllowlistDocument {
    allowlist: Vec<String>,
    #[serde(rename = "lastUpdated")]
    last_updated: String,
}

/// JSON-file persistence for the allowlist, with `~` expansion.
#[derive(Debug, Clone)]
pub struct AllowlistFile {
    path: PathBuf,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(dirs) = directories::BaseDirs::new()
    {
        return dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}

impl AllowlistFile {
    pub fn new(path: &str) -> Self {
        Self {
            path: expand_tilde(path),
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the allowlist. Missing file or unparseable content loads as
    /// empty; a present file with a missing or non-array `allowlist` key is
    /// also treated as empty, with no upgrade-in-place attempt.
    pub fn load(&self) -> Allowlist {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Allowlist::new(),
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "invalid allowlist file; starting empty");
                return Allowlist::new();
            },
        };
        let patterns = value
            .get("allowlist")
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Allowlist::from_patterns(patterns)
    }

    /// Persist atomically: write a sibling temp file, then rename over.
    pub fn save(&self, allowlist: &Allowlist) -> std::io::Result<()> {
        let document = AllowlistDocument {
            allowlist: allowlist.patterns(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_string_pretty(&document)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_non_colon_runs() {
        let list = Allowlist::from_patterns(vec!["telegram:*:chat-1".to_string()]);
        assert!(list.matches("telegram:bot-a:chat-1"));
        assert!(list.matches("telegram::chat-1"));
        assert!(!list.matches("telegram:bot:a:chat-1"));
        assert!(!list.matches("discord:bot-a:chat-1"));
    }

    #[test]
    fn question_mark_matches_exactly_one_char() {
        let list = Allowlist::from_patterns(vec!["user-?".to_string()]);
        assert!(list.matches("user-1"));
        assert!(!list.matches("user-12"));
        assert!(!list.matches("user-"));
    }

    #[test]
    fn patterns_are_anchored() {
        let list = Allowlist::from_patterns(vec!["chat".to_string()]);
        assert!(list.matches("chat"));
        assert!(!list.matches("chatter"));
        assert!(!list.matches("a-chat"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let list = Allowlist::from_patterns(vec!["user.(1)".to_string()]);
        assert!(list.matches("user.(1)"));
        assert!(!list.matches("userX(1)"));
    }

    #[test]
    fn add_dedupes_and_remove_works() {
        let mut list = Allowlist::new();
        assert!(list.add("a:b:c"));
        assert!(!list.add("a:b:c"));
        assert_eq!(list.len(), 1);
        assert!(list.remove("a:b:c"));
        assert!(!list.remove("a:b:c"));
        assert!(list.is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = AllowlistFile::at(dir.path().join("allowlist.json"));
        assert!(file.load().is_empty());
    }

    #[test]
    fn invalid_json_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.json");
        fs::write(&path, "not json at all {").unwrap();
        assert!(AllowlistFile::at(&path).load().is_empty());
    }

    #[test]
    fn missing_or_non_array_key_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.json");
        fs::write(&path, r#"{"lastUpdated": "2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(AllowlistFile::at(&path).load().is_empty());
        fs::write(&path, r#"{"allowlist": "oops"}"#).unwrap();
        assert!(AllowlistFile::at(&path).load().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = AllowlistFile::at(dir.path().join("nested").join("allowlist.json"));

        let mut list = Allowlist::new();
        list.add("telegram:bot-1:chat-123");
        list.add("user-*");
        file.save(&list).unwrap();

        let loaded = file.load();
        assert_eq!(loaded.patterns(), vec![
            "telegram:bot-1:chat-123".to_string(),
            "user-*".to_string()
        ]);
        assert!(loaded.matches("user-42"));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert!(raw.get("lastUpdated").and_then(|v| v.as_str()).is_some());
    }
}
