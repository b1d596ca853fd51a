//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`McpGateSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MCPGATE_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::McpGateSettings;

/// Resolve the path to the settings file (`~/.mcpgate/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mcpgate").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<McpGateSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or a merged result that
/// fails validation, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<McpGateSettings> {
    let defaults = serde_json::to_value(McpGateSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: McpGateSettings = serde_json::from_value(merged)?;
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

/// Reject settings the session manager cannot run with.
pub fn validate(settings: &McpGateSettings) -> Result<()> {
    let s = &settings.sessions;
    if s.streamable_ttl_ms == 0 || s.legacy_sse_ttl_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "session ttls must be non-zero".into(),
        ));
    }
    if s.legacy_keep_alive_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "legacyKeepAliveMs must be non-zero".into(),
        ));
    }
    if s.reaper_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "reaperIntervalMs must be non-zero".into(),
        ));
    }
    if s.session_close_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "sessionCloseTimeoutMs must be non-zero".into(),
        ));
    }
    if settings.server.shutdown_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "shutdownTimeoutMs must be non-zero".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_env_overrides(settings: &mut McpGateSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MCPGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("MCPGATE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u64("MCPGATE_SHUTDOWN_TIMEOUT_MS", 100, 600_000) {
        settings.server.shutdown_timeout_ms = v;
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MCPGATE_STREAMABLE_TTL_MS", 1_000, 86_400_000) {
        settings.sessions.streamable_ttl_ms = v;
    }
    if let Some(v) = read_env_u64("MCPGATE_LEGACY_SSE_TTL_MS", 1_000, 86_400_000) {
        settings.sessions.legacy_sse_ttl_ms = v;
    }
    if let Some(v) = read_env_u64("MCPGATE_LEGACY_KEEPALIVE_MS", 100, 3_600_000) {
        settings.sessions.legacy_keep_alive_ms = v;
    }
    if let Some(v) = read_env_bool("MCPGATE_ENABLE_HEALTH") {
        settings.sessions.enable_health = v;
    }
    if let Some(v) = read_env_u64("MCPGATE_REAPER_INTERVAL_MS", 100, 3_600_000) {
        settings.sessions.reaper_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MCPGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("MCPGATE_LOG_JSON") {
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
