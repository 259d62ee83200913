//! TOML config file loading, environment overrides and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub web: WebConfig,
    pub database: DatabaseConfig,
    pub recorder: RecorderConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub root: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub interval_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "farmsmart-hub".to_string(),
            keep_alive_secs: 30,
            reconnect_delay_secs: 2,
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            root: "FarmSmart".to_string(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:farmsmart.db?mode=rwc".to_string(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl RecorderConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// rumqttc rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_HOST`, `MQTT_PORT`, `WEB_PORT` and `DB_URL` on top of the
    /// file values. Unparsable ports are reported by `validate` as port 0.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(host) = get("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = get("MQTT_PORT") {
            self.mqtt.port = port.trim().parse().unwrap_or(0);
        }
        if let Some(port) = get("WEB_PORT") {
            self.web.port = port.trim().parse().unwrap_or(0);
        }
        if let Some(url) = get("DB_URL") {
            self.database.url = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_topics(&mut errors);

        if self.web.port == 0 {
            errors.push("web.port must be a non-zero port".to_string());
        }
        if !self.database.url.starts_with("sqlite:") {
            errors.push(format!(
                "database.url '{}' must start with 'sqlite:'",
                self.database.url
            ));
        }
        if self.recorder.interval_secs == 0 {
            errors.push("recorder.interval_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be a non-zero port".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        if m.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            errors.push(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}, got {}",
                m.keep_alive_secs
            ));
        }
        if m.reconnect_delay_secs == 0 {
            errors.push("mqtt.reconnect_delay_secs must be positive".to_string());
        }
    }

    fn validate_topics(&self, errors: &mut Vec<String>) {
        let root = self.topics.root.trim_end_matches('/');
        if root.trim().is_empty() {
            errors.push("topics.root is empty".to_string());
        } else if root.contains(&['+', '#'][..]) {
            errors.push(format!(
                "topics.root '{}' must not contain MQTT wildcards",
                self.topics.root
            ));
        } else if root.contains('/') {
            errors.push(format!(
                "topics.root '{}' must be a single topic level",
                self.topics.root
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults;
/// a file that exists but does not parse is an error.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(path, "config file not found, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
