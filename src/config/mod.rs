//! Session and environment configuration
//!
//! A config is a free-form string-to-value map with typed accessors for the
//! keys the engine recognizes. Unknown keys are preserved untouched and stay
//! visible to user scenarios.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Per-action and per-join cap applied when no `timeout` key is set
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// A possibly unbounded time limit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Finite(Duration),
    Infinity,
}

impl Timeout {
    pub fn from_millis(ms: u64) -> Self {
        Timeout::Finite(Duration::from_millis(ms))
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Timeout::Infinity)
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Finite(d) => Some(*d),
            Timeout::Infinity => None,
        }
    }

    fn from_value(value: &Value) -> Option<Timeout> {
        match value.untagged() {
            Value::String(s) if s == "infinity" => Some(Timeout::Infinity),
            other => duration_from(other).map(Timeout::Finite),
        }
    }

    fn to_value(self) -> Value {
        match self {
            Timeout::Finite(d) => Value::Int(d.as_millis() as i64),
            Timeout::Infinity => Value::String("infinity".to_string()),
        }
    }
}

fn duration_from(value: &Value) -> Option<Duration> {
    match value {
        Value::Int(ms) if *ms >= 0 => Some(Duration::from_millis(*ms as u64)),
        Value::Float(ms) if *ms >= 0.0 => Some(Duration::from_millis(*ms as u64)),
        _ => None,
    }
}

/// Configuration map for sessions, workers and environments
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    entries: HashMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with("timeout", Value::Int(timeout.as_millis() as i64))
    }

    pub fn with_scenario_timeout(self, timeout: Timeout) -> Self {
        self.with("scenario_timeout", timeout.to_value())
    }

    pub fn with_environment_timeout(self, timeout: Timeout) -> Self {
        self.with("environment_timeout", timeout.to_value())
    }

    pub fn with_session_name(self, name: impl Into<String>) -> Self {
        self.with("session_name", Value::String(name.into()))
    }

    pub fn with_base_url(self, url: impl Into<String>) -> Self {
        self.with("base_url", Value::String(url.into()))
    }

    /// Raw value for any key, recognized or not
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Overlay `other` on top of this config; later values win
    pub fn merged(&self, other: &Config) -> Config {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.clone());
        Config { entries }
    }

    /// Per-action and per-join cap; defaults to 10 s
    pub fn timeout(&self) -> Duration {
        self.get("timeout")
            .and_then(|v| duration_from(v.untagged()))
            .unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    /// Cap on a single scenario, `None` when unspecified
    pub fn scenario_timeout(&self) -> Option<Timeout> {
        self.get("scenario_timeout").and_then(Timeout::from_value)
    }

    /// Cap across a batch; unspecified means unbounded
    pub fn environment_timeout(&self) -> Timeout {
        self.get("environment_timeout")
            .and_then(Timeout::from_value)
            .unwrap_or(Timeout::Infinity)
    }

    pub fn session_name(&self) -> Option<&str> {
        self.get("session_name").and_then(|v| v.as_str())
    }

    pub fn base_url(&self) -> Option<&str> {
        self.get("base_url").and_then(|v| v.as_str())
    }

    /// Scenario-defined pre-delay, if the user set one
    pub fn delay(&self) -> Option<Duration> {
        self.get("delay").and_then(|v| duration_from(v.untagged()))
    }

    /// Scenario-defined jitter ceiling, if the user set one
    pub fn random_delay(&self) -> Option<Duration> {
        self.get("random_delay")
            .and_then(|v| duration_from(v.untagged()))
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        serde_json::from_str(&content).context("Failed to parse JSON config")
    }

    /// Save as a JSON config file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        let config = Config::new();
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.scenario_timeout(), None);
        assert_eq!(config.environment_timeout(), Timeout::Infinity);
    }

    #[test]
    fn test_recognized_keys() {
        let config = Config::new()
            .with_timeout(Duration::from_secs(5))
            .with_session_name("checkout")
            .with_base_url("http://localhost:8080");

        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.session_name(), Some("checkout"));
        assert_eq!(config.base_url(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_infinity_round_trip() {
        let config = Config::new().with_scenario_timeout(Timeout::Infinity);
        assert_eq!(config.scenario_timeout(), Some(Timeout::Infinity));

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scenario_timeout(), Some(Timeout::Infinity));
    }

    #[test]
    fn test_overlay_precedence() {
        let base = Config::new().with("timeout", 1000).with("custom", "base");
        let overlay = Config::new().with("custom", "overlay");

        let merged = base.merged(&overlay);
        assert_eq!(merged.timeout(), Duration::from_millis(1000));
        assert_eq!(
            merged.get("custom").and_then(|v| v.as_str()),
            Some("overlay")
        );
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let config = Config::new().with("think_time", 250);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("think_time").and_then(|v| v.as_i64()), Some(250));
    }
}
