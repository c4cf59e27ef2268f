//! WolfHA Configuration
//!
//! This module provides configuration structures for a WolfHA node:
//! its identity, the coordination names it contends on, and logging.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::identity::NodeIdentity;

/// Main WolfHA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfHaConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Role coordination configuration
    #[serde(default)]
    pub ha: HaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address where this node receives forwarded events (host:port)
    pub transport_address: String,

    /// Address where peers fetch this node's snapshot (host:port)
    pub management_address: String,

    /// Local bind address for the management server
    #[serde(default)]
    pub management_bind_address: Option<String>,
}

/// Role coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// Interval between retry attempts while not active
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Name of the cluster lock guarding the active role
    #[serde(default = "default_active_lock")]
    pub active_lock: String,

    /// Name of the cluster lock guarding the passive role
    #[serde(default = "default_passive_lock")]
    pub passive_lock: String,

    /// Name of the distributed map holding role -> node
    #[serde(default = "default_role_map")]
    pub role_map: String,

    /// Name of the distributed map holding node presence
    #[serde(default = "default_members_map")]
    pub members_map: String,

    /// Connect timeout for snapshot fetches
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Overall timeout for a single snapshot fetch
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_retry_interval_ms() -> u64 {
    15_000
}

fn default_active_lock() -> String {
    "active".to_string()
}

fn default_passive_lock() -> String {
    "passive".to_string()
}

fn default_role_map() -> String {
    "role-membership".to_string()
}

fn default_members_map() -> String {
    "members".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_snapshot_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            active_lock: default_active_lock(),
            passive_lock: default_passive_lock(),
            role_map: default_role_map(),
            members_map: default_members_map(),
            connect_timeout_ms: default_connect_timeout_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfHaConfig {
    /// Build a configuration for the given addresses with default settings
    pub fn new(transport_address: impl Into<String>, management_address: impl Into<String>) -> Self {
        Self {
            node: NodeConfig {
                transport_address: transport_address.into(),
                management_address: management_address.into(),
                management_bind_address: None,
            },
            ha: HaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfHaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        validate_address("node.transport_address", &self.node.transport_address)?;
        validate_address("node.management_address", &self.node.management_address)?;
        if let Some(bind) = &self.node.management_bind_address {
            validate_address("node.management_bind_address", bind)?;
        }

        if self.ha.retry_interval_ms == 0 {
            return Err(crate::Error::Config("ha.retry_interval_ms must be positive".into()));
        }

        if self.ha.active_lock.is_empty() || self.ha.passive_lock.is_empty() {
            return Err(crate::Error::Config("ha lock names cannot be empty".into()));
        }

        if self.ha.active_lock == self.ha.passive_lock {
            return Err(crate::Error::Config(
                "ha.active_lock and ha.passive_lock must differ".into(),
            ));
        }

        if self.ha.role_map.is_empty() || self.ha.members_map.is_empty() {
            return Err(crate::Error::Config("ha map names cannot be empty".into()));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "logging.format must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        }

        Ok(())
    }

    /// This node's identity as advertised to the cluster
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(
            self.node.transport_address.clone(),
            self.node.management_address.clone(),
        )
    }

    /// Get the management bind address (or the advertised one if not set)
    pub fn management_bind_address(&self) -> &str {
        self.node
            .management_bind_address
            .as_deref()
            .unwrap_or(&self.node.management_address)
    }

    /// Get retry interval as Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.ha.retry_interval_ms)
    }

    /// Get snapshot connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ha.connect_timeout_ms)
    }

    /// Get snapshot request timeout as Duration
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.ha.snapshot_timeout_ms)
    }
}

fn validate_address(field: &str, address: &str) -> crate::Result<()> {
    if address.is_empty() {
        return Err(crate::Error::Config(format!("{} cannot be empty", field)));
    }

    let valid = match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };

    if !valid {
        return Err(crate::Error::Config(format!(
            "{} must be host:port, got '{}'",
            field, address
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
transport_address = "10.0.0.1:11224"
management_address = "10.0.0.1:10005"

[ha]
retry_interval_ms = 5000

[logging]
level = "debug"
"#;

        let config = WolfHaConfig::from_str(toml).unwrap();
        assert_eq!(config.node.transport_address, "10.0.0.1:11224");
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.ha.active_lock, "active");
        assert_eq!(config.ha.passive_lock, "passive");
        assert_eq!(config.management_bind_address(), "10.0.0.1:10005");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_defaults_use_fifteen_second_retry() {
        let config = WolfHaConfig::new("127.0.0.1:11224", "127.0.0.1:10005");
        assert_eq!(config.retry_interval(), Duration::from_secs(15));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_identical_lock_names() {
        let mut config = WolfHaConfig::new("127.0.0.1:11224", "127.0.0.1:10005");
        config.ha.passive_lock = "active".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_address() {
        let config = WolfHaConfig::new("localhost", "127.0.0.1:10005");
        assert!(config.validate().is_err());

        let config = WolfHaConfig::new("127.0.0.1:11224", "127.0.0.1:notaport");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut config = WolfHaConfig::new("127.0.0.1:11224", "127.0.0.1:10005");
        config.node.management_bind_address = Some("0.0.0.0:10005".into());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = WolfHaConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.identity(), config.identity());
        assert_eq!(loaded.management_bind_address(), "0.0.0.0:10005");
    }
}
