use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::FailureStage;

pub const DEFAULT_CONFIG_PATH: &str = "traffic_light.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub program_id: String,
    pub account_source: String,
    pub account_name: String,
    pub seed_phrase: String,
    pub block_delay_ms: u64,
    pub client_ready: bool,
    pub in_flight_guard: bool,
    pub failure_stage: Option<FailureStage>,
    pub notification_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            program_id: "0xtraffic-light".into(),
            account_source: "polkadot-js".into(),
            account_name: "Alice".into(),
            seed_phrase: "//Alice".into(),
            block_delay_ms: 300,
            client_ready: true,
            in_flight_guard: false,
            failure_stage: None,
            notification_capacity: 64,
        }
    }
}

impl Settings {
    pub fn block_delay(&self) -> Duration {
        Duration::from_millis(self.block_delay_ms)
    }
}

/// Defaults, overlaid by the config file when it exists, then by the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw)?;
    for (key, value) in file_cfg {
        let value = match value {
            toml::Value::String(v) => v,
            other => other.to_string(),
        };
        apply_key(settings, &key, &value);
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    const KEYS: [&str; 9] = [
        "program_id",
        "account_source",
        "account_name",
        "seed_phrase",
        "block_delay_ms",
        "client_ready",
        "in_flight_guard",
        "failure_stage",
        "notification_capacity",
    ];

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = lookup(&format!("TRAFFIC_LIGHT_{upper}")) {
            apply_key(settings, key, &v);
        }
        if let Some(v) = lookup(&format!("APP__{upper}")) {
            apply_key(settings, key, &v);
        }
    }
}

fn apply_key(settings: &mut Settings, key: &str, value: &str) {
    let value = value.trim();
    match key {
        "program_id" => settings.program_id = value.to_string(),
        "account_source" => settings.account_source = value.to_string(),
        "account_name" => settings.account_name = value.to_string(),
        "seed_phrase" => settings.seed_phrase = value.to_string(),
        "block_delay_ms" => {
            if let Ok(parsed) = value.parse::<u64>() {
                settings.block_delay_ms = parsed;
            }
        }
        "client_ready" => {
            if let Some(parsed) = parse_flag(value) {
                settings.client_ready = parsed;
            }
        }
        "in_flight_guard" => {
            if let Some(parsed) = parse_flag(value) {
                settings.in_flight_guard = parsed;
            }
        }
        "failure_stage" => {
            settings.failure_stage = if value.is_empty() || value.eq_ignore_ascii_case("none") {
                None
            } else {
                FailureStage::parse(value)
            };
        }
        "notification_capacity" => {
            if let Ok(parsed) = value.parse::<usize>() {
                settings.notification_capacity = parsed.max(1);
            }
        }
        _ => {}
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
