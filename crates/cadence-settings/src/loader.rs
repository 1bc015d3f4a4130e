//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CadenceSettings::default()`]
//! 2. If `~/.cadence/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate ranges that the file layer could have broken
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CadenceSettings;

const MEMORY_LENGTH_RANGE: (usize, usize) = (1, 1000);
const MAX_TOKENS_RANGE: (u32, u32) = (1, 32_768);

/// Resolve the path to the settings file (`~/.cadence/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cadence").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CadenceSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or out-of-range values, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<CadenceSettings> {
    let defaults = serde_json::to_value(CadenceSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CadenceSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `CADENCE_*` environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut CadenceSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, which maps a variable name to
/// its raw value.
pub fn apply_overrides_from<F>(settings: &mut CadenceSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── LLM ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("CADENCE_API_KEY") {
        settings.llm.api_key = v;
    }
    if let Some(v) = env.string("CADENCE_BASE_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = env.string("CADENCE_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.u32("CADENCE_MAX_TOKENS", MAX_TOKENS_RANGE.0, MAX_TOKENS_RANGE.1) {
        settings.llm.max_tokens = v;
    }
    if let Some(v) = env.string("CADENCE_PROMPT") {
        settings.llm.prompt = v;
    }

    // ── Chat ────────────────────────────────────────────────────────
    if let Some(v) = env.usize(
        "CADENCE_MAX_MEMORY_LENGTH",
        MEMORY_LENGTH_RANGE.0,
        MEMORY_LENGTH_RANGE.1,
    ) {
        settings.chat.max_memory_length = v;
    }
    if let Some(v) = env.string("CADENCE_GREETING") {
        settings.chat.greeting = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CADENCE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("CADENCE_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn validate(settings: &CadenceSettings) -> Result<()> {
    check_range(
        "chat.maxMemoryLength",
        settings.chat.max_memory_length as u64,
        MEMORY_LENGTH_RANGE.0 as u64,
        MEMORY_LENGTH_RANGE.1 as u64,
    )?;
    check_range(
        "llm.maxTokens",
        u64::from(settings.llm.max_tokens),
        u64::from(MAX_TOKENS_RANGE.0),
        u64::from(MAX_TOKENS_RANGE.1),
    )
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange { key, value, min, max })
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.lookup)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
