//! WolfCare Configuration
//!
//! This module provides configuration structures for a WolfCare node:
//! identity, record storage location, HTTP API and peer replication.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::replication::{Action, ObjectType};

/// Main WolfCare configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfCareConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Node number embedded in generated record identifiers (0-1023),
    /// distinct for every node of a deployment
    pub number: u16,

    /// Data directory for the record database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Base URLs of peer nodes (e.g. "http://node-2:8080")
    #[serde(default)]
    pub peers: Vec<String>,

    /// Per-request delivery timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delivery attempts per peer (1 = no redelivery)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between delivery attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long applied request ids are remembered (0 = forever)
    #[serde(default = "default_dedup_retention_secs")]
    pub dedup_retention_secs: u64,

    /// How often expired request ids are swept
    #[serde(default = "default_dedup_sweep_interval_secs")]
    pub dedup_sweep_interval_secs: u64,

    /// Operations removed from the apply dispatch table, as "object_type:action"
    #[serde(default)]
    pub disabled_operations: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfcare")
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_dedup_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_dedup_sweep_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
        }
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            dedup_retention_secs: default_dedup_retention_secs(),
            dedup_sweep_interval_secs: default_dedup_sweep_interval_secs(),
            disabled_operations: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ReplicationSettings {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get base retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Dedup retention window, `None` when ids are kept forever
    pub fn dedup_retention(&self) -> Option<Duration> {
        (self.dedup_retention_secs > 0).then(|| Duration::from_secs(self.dedup_retention_secs))
    }

    /// Parse `disabled_operations` into typed pairs
    pub fn disabled_pairs(&self) -> crate::Result<Vec<(ObjectType, Action)>> {
        self.disabled_operations
            .iter()
            .map(|raw| {
                let (object_type, action) = raw.split_once(':').ok_or_else(|| {
                    crate::Error::Config(format!(
                        "disabled operation '{}' must look like 'object_type:action'",
                        raw
                    ))
                })?;
                let object_type = object_type
                    .parse::<ObjectType>()
                    .map_err(|e| crate::Error::Config(e.to_string()))?;
                let action = action
                    .parse::<Action>()
                    .map_err(|e| crate::Error::Config(e.to_string()))?;
                Ok((object_type, action))
            })
            .collect()
    }
}

impl WolfCareConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfCareConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.number > crate::id::MAX_NODE_NUMBER {
            return Err(crate::Error::Config(format!(
                "node.number must be 0-{}, got {}",
                crate::id::MAX_NODE_NUMBER,
                self.node.number
            )));
        }

        if self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        for peer in &self.replication.peers {
            if !(peer.starts_with("http://") || peer.starts_with("https://")) {
                return Err(crate::Error::Config(format!(
                    "peer '{}' must be an http:// or https:// base URL",
                    peer
                )));
            }
        }

        if self.replication.max_attempts == 0 {
            return Err(crate::Error::Config("replication.max_attempts must be at least 1".into()));
        }

        self.replication.disabled_pairs()?;

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Path of the SQLite record database
    pub fn database_path(&self) -> PathBuf {
        self.node.data_dir.join("records.db")
    }

    /// Render a starter configuration for `wolfcare init`
    pub fn sample(node_id: &str, node_number: u16) -> String {
        format!(
            r#"[node]
id = "{node_id}"
# Must differ on every node
number = {node_number}
data_dir = "/var/lib/wolfcare"

[api]
bind_address = "0.0.0.0:8080"

[replication]
# Base URLs of every other node
peers = []
request_timeout_ms = 5000
connect_timeout_ms = 1000
max_attempts = 3
retry_backoff_ms = 200
dedup_retention_secs = 86400
# e.g. ["user:update"]
disabled_operations = []

[logging]
level = "info"
"#
        )
    }
}
