//! JSON persistence for replies, reactions and runtime settings.
//!
//! Everything lives under the data directory as small JSON documents.
//! Loads are forgiving: a missing or corrupt file logs and falls back
//! to built-in defaults so the responder always starts.

use crate::matcher::ReplyIndex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const REPLIES_FILE: &str = "replies.json";
const REACTIONS_FILE: &str = "reactions.json";
const SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_REACTIONS: &[&str] = &["👍", "❤️", "😂", "🔥", "🎉"];

pub struct ReplyStore {
    data_dir: PathBuf,
}

impl ReplyStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn replies_path(&self) -> PathBuf {
        self.data_dir.join(REPLIES_FILE)
    }

    pub fn reactions_path(&self) -> PathBuf {
        self.data_dir.join(REACTIONS_FILE)
    }

    /// Load the reply index, falling back to the built-in set.
    pub async fn load_replies(&self) -> ReplyIndex {
        let path = self.replies_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Vec<String>>>(&contents) {
                Ok(raw) => {
                    let index = ReplyIndex::from_entries(raw);
                    if index.is_empty() {
                        tracing::warn!(path = %path.display(), "reply file empty; using built-in replies");
                        ReplyIndex::defaults()
                    } else {
                        tracing::info!(patterns = index.len(), "loaded replies");
                        index
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "reply file unparseable; using built-in replies");
                    ReplyIndex::defaults()
                }
            },
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "reply file not readable; using built-in replies");
                ReplyIndex::defaults()
            }
        }
    }

    pub async fn save_replies(&self, entries: &HashMap<String, Vec<String>>) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.replies_path(), &body).await
    }

    /// Load the reaction emoji pool, falling back to the default set.
    pub async fn load_reactions(&self) -> Vec<String> {
        let path = self.reactions_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(reactions) if !reactions.is_empty() => reactions,
                Ok(_) => default_reactions(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "reaction file unparseable; using defaults");
                    default_reactions()
                }
            },
            Err(_) => default_reactions(),
        }
    }
}

pub fn default_reactions() -> Vec<String> {
    DEFAULT_REACTIONS.iter().map(|s| s.to_string()).collect()
}

/// Runtime-mutable settings, addressed by dot path ("behavior.auto_react").
///
/// Settings are a JSON object merged over built-in defaults at load
/// time; `set` persists the whole document after each change.
pub struct SettingsStore {
    path: PathBuf,
    values: RwLock<Value>,
}

impl SettingsStore {
    pub fn defaults() -> Value {
        serde_json::json!({
            "behavior": {
                "use_borders": true,
                "auto_react": true,
                "reply_in_groups": false,
                "reply_in_channels": false,
            }
        })
    }

    /// Load settings from `data_dir/settings.json`, merging over
    /// defaults. Unknown keys are kept.
    pub async fn load(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(SETTINGS_FILE);
        let mut values = Self::defaults();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(stored) if stored.is_object() => merge_json_value(&mut values, stored),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "settings file is not an object; using defaults");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "settings unparseable; using defaults");
                }
            },
            Err(_) => {}
        }
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, dot_path: &str) -> Option<Value> {
        let values = self.read();
        let mut current = &*values;
        for segment in dot_path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Boolean lookup with a default for missing or non-bool values.
    pub fn get_bool(&self, dot_path: &str, default: bool) -> bool {
        self.get(dot_path)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Set a value by dot path, creating intermediate objects, then
    /// persist the document. Empty path segments are rejected.
    pub async fn set(&self, dot_path: &str, value: Value) -> anyhow::Result<()> {
        let segments: Vec<&str> = dot_path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            anyhow::bail!("invalid settings path: {dot_path}");
        }
        let snapshot = {
            let mut values = self.write();
            set_at_path(&mut values, &segments, value)?;
            values.clone()
        };
        let body = serde_json::to_string_pretty(&snapshot)?;
        write_atomic(&self.path, &body).await
    }

    pub fn snapshot(&self) -> Value {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Value> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Value> {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deep merge: objects merge key by key, everything else replaces.
fn merge_json_value(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json_value(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, incoming) => *base_slot = incoming,
    }
}

fn set_at_path(root: &mut Value, segments: &[&str], value: Value) -> anyhow::Result<()> {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        current = ensure_object(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let last = segments[segments.len() - 1];
    ensure_object(current).insert(last.to_string(), value);
    Ok(())
}

/// Non-object values along a settings path are replaced by objects.
fn ensure_object(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

async fn write_atomic(path: &Path, body: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
