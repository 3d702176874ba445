use std::collections::HashSet;
use std::env;

use super::types::{ConfigError, Environment, StoreBackendKind};

const DEFAULT_WARNING_THRESHOLDS: &[u64] = &[300, 60];

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(super) fn parse_store_backend(value: String) -> Result<StoreBackendKind, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "file" | "fs" => Ok(StoreBackendKind::File),
        "redis" => Ok(StoreBackendKind::Redis),
        "memory" | "mem" => Ok(StoreBackendKind::Memory),
        _ => Err(ConfigError::InvalidValue { field: "SESSION_STORE_BACKEND", value }),
    }
}

/// Parses `300,60` or `five-minutes:300,last-minute:60`. A bare number uses itself as the id.
pub(super) fn parse_thresholds(value: Option<String>) -> Result<Vec<(String, u64)>, ConfigError> {
    let Some(raw) = value else {
        return Ok(DEFAULT_WARNING_THRESHOLDS.iter().map(|secs| (secs.to_string(), *secs)).collect());
    };

    let mut seen = HashSet::new();
    let mut thresholds = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (id, seconds) = match entry.split_once(':') {
            Some((id, seconds)) => (id.trim().to_string(), seconds.trim()),
            None => (entry.to_string(), entry),
        };
        let seconds: u64 =
            seconds.parse().map_err(|_| ConfigError::InvalidThresholds(raw.clone()))?;
        if id.is_empty() || seconds == 0 || !seen.insert(id.clone()) {
            return Err(ConfigError::InvalidThresholds(raw.clone()));
        }
        thresholds.push((id, seconds));
    }

    thresholds.sort_by(|left, right| right.1.cmp(&left.1));
    Ok(thresholds)
}
