//! Configuration management for the Ember+ gateway
//!
//! Handles loading, parsing, upgrading and hot-reloading of the YAML
//! configuration file.

pub mod upgrade;
pub mod watcher;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::fs;

pub use watcher::ConfigWatcher;

use crate::coerce::split_path_list;
use crate::connection::ConnectionSettings;
use crate::ember::TreeElement;
use crate::host::LogLevel;

/// Root of the gateway configuration file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct GatewayConfig {
    pub instance: InstanceConfig,
    /// Simulated provider tree used by `--simulate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationConfig>,
    /// Saved action/feedback options, upgraded on load
    #[serde(default)]
    pub saved: SavedItems,
}

/// Per-instance settings as the host would store them
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Provider IP or hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Discovered device as `"ip:port"`; overrides host/port when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect as soon as a source is selected
    #[serde(default)]
    pub take: bool,
    /// Comma-separated matrix paths
    #[serde(default)]
    pub matrices: String,
    /// Comma-separated parameter paths kept subscribed
    #[serde(default)]
    pub monitored_params: String,
    /// Divide Integer values by their factor for display
    #[serde(default)]
    pub factor: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub timings: Timings,
}

/// Timer settings (production defaults)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Forced session refresh; 0 disables it
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Coalescing window for variable pushes and feedback re-checks
    #[serde(default = "default_update_window_ms")]
    pub update_window_ms: u64,
    #[serde(default = "default_status_throttle_ms")]
    pub status_throttle_ms: u64,
    /// Longest wait for one device request; 0 waits forever
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
            update_window_ms: default_update_window_ms(),
            status_throttle_ms: default_status_throttle_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Timings {
    pub fn update_window(&self) -> Duration {
        Duration::from_millis(self.update_window_ms)
    }

    pub fn status_throttle(&self) -> Duration {
        Duration::from_millis(self.status_throttle_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SimulationConfig {
    #[serde(default)]
    pub elements: Vec<TreeElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SavedItems {
    #[serde(default)]
    pub actions: Vec<SavedAction>,
    #[serde(default)]
    pub feedbacks: Vec<SavedFeedback>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavedAction {
    pub action_id: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SavedFeedback {
    pub feedback_id: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            host: None,
            device: None,
            port: default_port(),
            take: false,
            matrices: String::new(),
            monitored_params: String::new(),
            factor: false,
            log_level: LogLevel::default(),
            timings: Timings::default(),
        }
    }
}

impl InstanceConfig {
    /// Effective host and port (a discovered device wins)
    pub fn endpoint(&self) -> (Option<String>, u16) {
        if let Some(device) = self.device.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            return match device.rsplit_once(':') {
                Some((ip, port)) => (Some(ip.to_string()), port.parse().unwrap_or(self.port)),
                None => (Some(device.to_string()), self.port),
            };
        }
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        (host, self.port)
    }

    pub fn matrix_paths(&self) -> Vec<String> {
        split_path_list(&self.matrices)
    }

    pub fn monitored_paths(&self) -> Vec<String> {
        split_path_list(&self.monitored_params)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let (host, port) = self.endpoint();
        ConnectionSettings {
            host,
            port,
            reconnect_delay: Duration::from_millis(self.timings.reconnect_delay_ms),
            refresh_interval: Duration::from_secs(self.timings.refresh_interval_secs),
            request_timeout: Duration::from_millis(self.timings.request_timeout_ms),
        }
    }

    /// Validate values the host form cannot constrain
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port must be between 1 and 65535");
        }
        if self.timings.reconnect_delay_ms == 0 {
            anyhow::bail!("timings.reconnectDelayMs must be greater than 0");
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Load configuration from file, validate it and upgrade saved options
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::parse(&contents)
            .with_context(|| format!("Failed to load config: {}", path))?;
        let upgraded = upgrade::upgrade_saved(&mut config.saved);
        if upgraded > 0 {
            tracing::info!("Upgraded {} saved item(s) from {}", upgraded, path);
        }
        Ok(config)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let config: GatewayConfig =
            serde_yaml::from_str(yaml).context("Failed to parse YAML config")?;
        config.instance.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// JSON schema of the config file
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(GatewayConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}

// Default value functions
fn default_port() -> u16 { 9000 }
fn default_reconnect_delay_ms() -> u64 { 5000 }
fn default_refresh_interval_secs() -> u64 { 600 }
fn default_update_window_ms() -> u64 { 100 }
fn default_status_throttle_ms() -> u64 { 250 }
fn default_request_timeout_ms() -> u64 { 10_000 }
