// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Control-plane configuration manifest.
//!
//! Loaded from YAML with discovery precedence:
//! 1. `GRIDPLANE_CONFIG_PATH` environment variable
//! 2. `./gridplane.yaml` (working directory)
//! 3. `~/.gridplane/config.yaml` (user home)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridplaneConfig {
    /// Control-plane node identity.
    #[serde(default)]
    pub node: NodeIdentity,

    /// Background loop intervals.
    #[serde(default)]
    pub intervals: Intervals,

    /// Containers missing a heartbeat for longer than this are evicted.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub hub: HubSettings,

    /// Labels discovery reads off workload containers.
    #[serde(default)]
    pub labels: LabelConventions,

    /// Directory for the embedded store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable identifier this control plane uses as message source.
    #[serde(default = "default_node_id")]
    pub id: String,

    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            name: default_node_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervals {
    #[serde(default = "default_discovery_interval")]
    pub discovery_secs: u64,

    #[serde(default = "default_health_interval")]
    pub health_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_secs: u64,

    /// Expired-key sweep over the embedded store.
    #[serde(default = "default_sweep_interval")]
    pub sweep_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            discovery_secs: default_discovery_interval(),
            health_secs: default_health_interval(),
            cleanup_secs: default_cleanup_interval(),
            sweep_secs: default_sweep_interval(),
        }
    }
}

impl Intervals {
    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }

    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    /// Custom Docker socket path; `None` auto-detects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Encrypt message payloads on the bus. Key setup failure downgrades to
    /// plaintext rather than refusing to send.
    #[serde(default = "default_true")]
    pub encrypt: bool,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_response_ttl")]
    pub response_ttl_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            encrypt: true,
            channel_capacity: default_channel_capacity(),
            response_ttl_secs: default_response_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConventions {
    /// Marker label identifying compatible workloads.
    #[serde(default = "default_enabled_label")]
    pub enabled: String,

    /// Comma-separated capability tags.
    #[serde(default = "default_capabilities_label")]
    pub capabilities: String,

    /// Port of the workload's agent API.
    #[serde(default = "default_api_port_label")]
    pub api_port: String,

    /// Marker file probed inside workloads lacking the enabled label.
    #[serde(default = "default_marker_file")]
    pub marker_file: String,
}

impl Default for LabelConventions {
    fn default() -> Self {
        Self {
            enabled: default_enabled_label(),
            capabilities: default_capabilities_label(),
            api_port: default_api_port_label(),
            marker_file: default_marker_file(),
        }
    }
}

impl Default for GridplaneConfig {
    fn default() -> Self {
        Self {
            node: NodeIdentity::default(),
            intervals: Intervals::default(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            docker: DockerConfig::default(),
            hub: HubSettings::default(),
            labels: LabelConventions::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl GridplaneConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover a configuration file using precedence order.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GRIDPLANE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gridplane.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gridplane").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, falling back to defaults.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Environment overrides for container deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GRIDPLANE_HUB_ENCRYPT") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: GRIDPLANE_HUB_ENCRYPT=true");
                    self.hub.encrypt = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: GRIDPLANE_HUB_ENCRYPT=false");
                    self.hub.encrypt = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for GRIDPLANE_HUB_ENCRYPT: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("GRIDPLANE_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.id.is_empty() {
            anyhow::bail!("node.id cannot be empty");
        }
        if self.node.name.is_empty() {
            anyhow::bail!("node.name cannot be empty");
        }
        if self.intervals.discovery_secs == 0
            || self.intervals.health_secs == 0
            || self.intervals.cleanup_secs == 0
            || self.intervals.sweep_secs == 0
        {
            anyhow::bail!("background loop intervals must be non-zero");
        }
        if self.heartbeat_timeout_secs < self.intervals.cleanup_secs {
            anyhow::bail!(
                "heartbeat_timeout_secs ({}) must be at least the cleanup interval ({})",
                self.heartbeat_timeout_secs,
                self.intervals.cleanup_secs
            );
        }
        if self.hub.channel_capacity == 0 {
            anyhow::bail!("hub.channel_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_node_id() -> String {
    format!("gridplane-{}", uuid::Uuid::new_v4())
}

fn default_node_name() -> String {
    "gridplane-controlplane".to_string()
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_health_interval() -> u64 {
    15
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_response_ttl() -> u64 {
    60
}

fn default_enabled_label() -> String {
    "gridplane.enabled".to_string()
}

fn default_capabilities_label() -> String {
    "gridplane.capabilities".to_string()
}

fn default_api_port_label() -> String {
    "gridplane.api-port".to_string()
}

fn default_marker_file() -> String {
    "/etc/gridplane/enabled".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./gridplane-data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GridplaneConfig::default();
        assert_eq!(config.intervals.discovery_secs, 30);
        assert_eq!(config.intervals.health_secs, 15);
        assert_eq!(config.intervals.cleanup_secs, 30);
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert!(config.hub.encrypt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
node:
  id: cp-1
  name: gridplane-test
intervals:
  discovery_secs: 10
heartbeat_timeout_secs: 45
hub:
  encrypt: false
"#;
        let config = GridplaneConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.node.id, "cp-1");
        assert_eq!(config.intervals.discovery_secs, 10);
        // Unset fields keep their defaults.
        assert_eq!(config.intervals.health_secs, 15);
        assert_eq!(config.heartbeat_timeout_secs, 45);
        assert!(!config.hub.encrypt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let mut config = GridplaneConfig::default();
        config.intervals.health_secs = 0;
        assert!(config.validate().is_err());

        let mut config = GridplaneConfig::default();
        config.heartbeat_timeout_secs = 5;
        assert!(config.validate().is_err());
    }
}
