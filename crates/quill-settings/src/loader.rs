//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::QuillSettings;

/// `~/.quill`, or `/tmp/.quill` when HOME is unset.
pub fn quill_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".quill")
}

pub fn settings_path() -> PathBuf {
    quill_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<QuillSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<QuillSettings> {
    let mut settings = merge_file_over_defaults(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn merge_file_over_defaults(path: &Path) -> Result<QuillSettings> {
    let defaults = serde_json::to_value(QuillSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut QuillSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `QUILL_*` overrides read through `lookup`.
///
/// Out-of-range or unparsable values are ignored with a warning.
pub fn apply_overrides(settings: &mut QuillSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("QUILL_ENDPOINT") {
        settings.api.endpoint = v;
    }
    if let Some(v) = string("QUILL_API_KEY") {
        settings.api.api_key = v;
    }
    if let Some(v) = string("QUILL_MODEL") {
        settings.api.model = v;
    }
    if let Some(v) = string("QUILL_TEMPERATURE") {
        match parse_f64_range(&v, 0.0, 2.0) {
            Some(t) => settings.api.temperature = t,
            None => warn_invalid("QUILL_TEMPERATURE", &v),
        }
    }
    if let Some(v) = string("QUILL_MAX_TOKENS") {
        match parse_u64_range(&v, 1, 1_000_000) {
            Some(n) => settings.api.max_tokens = n as u32,
            None => warn_invalid("QUILL_MAX_TOKENS", &v),
        }
    }
    if let Some(v) = string("QUILL_MAX_HISTORY_TURNS") {
        match parse_u64_range(&v, 1, 10_000) {
            Some(n) => settings.context.max_history_turns = n as usize,
            None => warn_invalid("QUILL_MAX_HISTORY_TURNS", &v),
        }
    }
    if let Some(v) = string("QUILL_FOLD_KEEP_COUNT") {
        match parse_u64_range(&v, 0, 1_000) {
            Some(n) => settings.context.fold_keep_count = n as usize,
            None => warn_invalid("QUILL_FOLD_KEEP_COUNT", &v),
        }
    }
    if let Some(v) = string("QUILL_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = string("QUILL_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env override, ignoring");
}
