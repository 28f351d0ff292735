//! Winder settings from winder.yaml, .env and the environment
//!
//! The YAML file is optional. It has a `default` block and per-hostname
//! blocks under `hosts`; the host block wins over the default block, and
//! WINDER_PORT / WINDER_BAUD win over both.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::transport::{LinkSettings, PortSelector};
use crate::winder::{WinderConfig, DEFAULT_CLOSE_WAIT};

pub const DEFAULT_CONFIG_FILE: &str = "winder.yaml";

/// PORT may be a number (index) or a device path
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    Index(u8),
    Name(String),
}

impl PortValue {
    fn to_selector(&self) -> PortSelector {
        match self {
            PortValue::Index(n) => PortSelector::Index(*n),
            PortValue::Name(s) => PortSelector::parse(s),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct HostConfig {
    #[serde(rename = "PORT")]
    pub port: Option<PortValue>,
    #[serde(rename = "BAUD_RATE")]
    pub baud_rate: Option<u32>,
    #[serde(rename = "SETTLE_MS")]
    pub settle_ms: Option<u64>,
    #[serde(rename = "CLOSE_WAIT_SECS")]
    pub close_wait_secs: Option<f64>,
    #[serde(rename = "DRAIN_MS")]
    pub drain_ms: Option<u64>,
    #[serde(rename = "REPLY_TIMEOUT_MS")]
    pub reply_timeout_ms: Option<u64>,
    #[serde(rename = "POLL_MS")]
    pub poll_ms: Option<u64>,
}

impl HostConfig {
    /// Fill unset keys from `fallback`.
    fn or(self, fallback: &HostConfig) -> HostConfig {
        HostConfig {
            port: self.port.or_else(|| fallback.port.clone()),
            baud_rate: self.baud_rate.or(fallback.baud_rate),
            settle_ms: self.settle_ms.or(fallback.settle_ms),
            close_wait_secs: self.close_wait_secs.or(fallback.close_wait_secs),
            drain_ms: self.drain_ms.or(fallback.drain_ms),
            reply_timeout_ms: self.reply_timeout_ms.or(fallback.reply_timeout_ms),
            poll_ms: self.poll_ms.or(fallback.poll_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub default: HostConfig,
    #[serde(default)]
    pub hosts: HashMap<String, HostConfig>,
}

/// Resolved settings for one run of the winder app
#[derive(Debug, Clone)]
pub struct WinderSettings {
    pub port: PortSelector,
    pub link: LinkSettings,
    pub winder: WinderConfig,
    pub close_wait: Duration,
    /// Rev count polling interval of the console's watch mode
    pub poll_interval: Duration,
}

impl Default for WinderSettings {
    fn default() -> Self {
        Self {
            port: PortSelector::Auto,
            link: LinkSettings::default(),
            winder: WinderConfig::default(),
            close_wait: DEFAULT_CLOSE_WAIT,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WinderSettings {
    fn apply(&mut self, host: &HostConfig) -> Result<()> {
        if let Some(port) = &host.port {
            self.port = port.to_selector();
        }
        if let Some(baud) = host.baud_rate {
            self.link.baud_rate = baud;
        }
        if let Some(ms) = host.settle_ms {
            self.link.settle = Duration::from_millis(ms);
        }
        if let Some(secs) = host.close_wait_secs {
            self.close_wait = Duration::try_from_secs_f64(secs)
                .map_err(|e| anyhow!("CLOSE_WAIT_SECS {} is not a valid duration: {}", secs, e))?;
        }
        if let Some(ms) = host.drain_ms {
            self.winder.drain_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = host.reply_timeout_ms {
            // 0 keeps the blocking behaviour
            self.winder.reply_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = host.poll_ms {
            self.poll_interval = Duration::from_millis(ms.max(1));
        }
        Ok(())
    }

    /// Apply WINDER_PORT and WINDER_BAUD as returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("WINDER_PORT") {
            debug!("WINDER_PORT={}", port);
            self.port = PortSelector::parse(&port);
        }
        if let Some(baud) = lookup("WINDER_BAUD") {
            self.link.baud_rate = baud
                .trim()
                .parse()
                .with_context(|| format!("WINDER_BAUD '{}' is not a baud rate", baud))?;
        }
        Ok(())
    }
}

pub fn parse_config(yaml: &str) -> Result<Config> {
    if yaml.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

/// Settings for `hostname` from an already parsed config
pub fn settings_for(config: &Config, hostname: &str) -> Result<WinderSettings> {
    let host = match config.hosts.get(hostname) {
        Some(h) => {
            debug!("Using host block '{}'", hostname);
            h.clone().or(&config.default)
        }
        None => config.default.clone(),
    };
    let mut settings = WinderSettings::default();
    settings.apply(&host)?;
    Ok(settings)
}

/// Load settings for `hostname`. A missing file means defaults; a malformed one is an error.
pub fn load_settings(path: &Path, hostname: &str) -> Result<WinderSettings> {
    let config = match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No {} found, using defaults", path.display());
            Config::default()
        }
        Err(e) => return Err(anyhow!("Failed to read {}: {}", path.display(), e)),
    };

    // .env is optional
    let _ = dotenvy::dotenv();

    let mut settings = settings_for(&config, hostname)?;
    settings.apply_env(|k| std::env::var(k).ok())?;
    Ok(settings)
}
