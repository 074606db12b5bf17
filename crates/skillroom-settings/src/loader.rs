//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SkillroomSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `SKILLROOM_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{AssistantProvider, SkillroomSettings};

/// `~/.skillroom`, falling back to `/tmp/.skillroom` without `HOME`.
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".skillroom")
}

/// Resolve the path to the settings file (`~/.skillroom/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SkillroomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<SkillroomSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the file layer merged on top.
fn read_layers(path: &Path) -> Result<SkillroomSettings> {
    let defaults = serde_json::to_value(SkillroomSettings::default())?;

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

/// Apply `SKILLROOM_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored, falling back to the file or
/// default value.
pub fn apply_env_overrides<F>(settings: &mut SkillroomSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SKILLROOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("SKILLROOM_PORT", 0, 65_535) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = env.u64_in("SKILLROOM_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(settings.server.max_connections);
    }
    if let Some(v) = env.u64_in("SKILLROOM_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }

    // ── Assistant ───────────────────────────────────────────────────
    if let Some(v) = env.string("SKILLROOM_AI_PROVIDER") {
        match parse_provider(&v) {
            Some(p) => settings.assistant.provider = p,
            None => tracing::warn!(key = "SKILLROOM_AI_PROVIDER", value = %v, "unknown provider, ignoring"),
        }
    }
    if let Some(v) = env.string("SKILLROOM_AI_BASE_URL") {
        settings.assistant.base_url = v;
    }
    if let Some(v) = env.string("SKILLROOM_AI_MODEL") {
        settings.assistant.model = v;
    }
    if let Some(v) = env.u64_in("SKILLROOM_AI_TIMEOUT_MS", 1_000, 600_000) {
        settings.assistant.timeout_ms = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SKILLROOM_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = env.string("SKILLROOM_DISPLAY_NAME") {
        settings.client.display_name = Some(v);
    }
    if let Some(v) = env.u64_in("SKILLROOM_COMPILE_DELAY_MS", 0, 60_000) {
        settings.client.compile_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SKILLROOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SKILLROOM_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.bool("SKILLROOM_LOG_PERSIST") {
        settings.logging.persist_warnings = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_provider(val: &str) -> Option<AssistantProvider> {
    match val.to_lowercase().as_str() {
        "openai" | "openrouter" => Some(AssistantProvider::OpenAi),
        "mock" => Some(AssistantProvider::Mock),
        _ => None,
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
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

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_objects_per_key() {
        let target = serde_json::json!({"server": {"host": "a", "port": 1}});
        let source = serde_json::json!({"server": {"port": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "a");
        assert_eq!(merged["server"]["port"], 2);
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(serde_json::json!({"a": [1, 2]}), serde_json::json!({"a": [3]}));
        assert_eq!(merged["a"], serde_json::json!([3]));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = SkillroomSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SKILLROOM_PORT", "4555"),
                ("SKILLROOM_AI_PROVIDER", "mock"),
                ("SKILLROOM_DISPLAY_NAME", "Ada"),
                ("SKILLROOM_LOG_JSON", "true"),
            ]),
        );
        assert_eq!(settings.server.port, 4555);
        assert_eq!(settings.assistant.provider, AssistantProvider::Mock);
        assert_eq!(settings.client.display_name.as_deref(), Some("Ada"));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = SkillroomSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SKILLROOM_PORT", "99999"),
                ("SKILLROOM_AI_PROVIDER", "carrier-pigeon"),
                ("SKILLROOM_LOG_JSON", "sometimes"),
                ("SKILLROOM_HOST", ""),
            ]),
        );
        let defaults = SkillroomSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.host, defaults.server.host);
        assert_eq!(settings.assistant.provider, defaults.assistant.provider);
        assert_eq!(settings.logging.json, defaults.logging.json);
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_layers(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 4000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"client":{"compileDelayMs":250},"assistant":{"model":"gpt-4o-mini"}}"#,
        )
        .unwrap();
        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.client.compile_delay_ms, 250);
        assert_eq!(settings.client.file_chunk_size, 16 * 1024);
        assert_eq!(settings.assistant.model, "gpt-4o-mini");
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_layers(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"client":{"fileChunkSize":0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
