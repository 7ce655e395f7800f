//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PARLEY_*` environment variable overrides
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ParleySettings;

/// Resolve the default settings file path (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load from `path`, resolving environment overrides through `env`.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `PARLEY_*` overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ParleySettings, env: impl Fn(&str) -> Option<String>) {
    let env = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(v) = env("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_PORT", |s| s.parse::<u16>().ok()) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_MAX_CONNECTIONS", |s| {
        parse_range(s, 1_usize, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_HEARTBEAT_INTERVAL_SECS", |s| {
        parse_range(s, 1_u64, 3600)
    }) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_HEARTBEAT_TIMEOUT_SECS", |s| {
        parse_range(s, 1_u64, 86_400)
    }) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_IDENTIFY_TIMEOUT_SECS", |s| {
        parse_range(s, 1_u64, 3600)
    }) {
        settings.server.identify_timeout_secs = v;
    }
    if let Some(v) = env("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&env, "PARLEY_LOG_JSON", parse_bool) {
        settings.logging.json = v;
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

/// Parse a string as a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parsed<T>(
    env: impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = env(key)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key, value = %val, "invalid env var, ignoring");
    }
    result
}
