//! Configuration system for dashlink
//!
//! One TOML file describes the broker, the reconnection policy, the dashboard
//! topics and where persisted state lives. Every section is optional; missing
//! values fall back to the public classroom broker setup.

use crate::protocol::topics::{validate_topic_filter, TopicMap};
use crate::transport::mqtt::{
    ConnectionConfig, ConnectionProtocol, Credentials, HealthMonitor, ReconnectConfig,
    MAX_KEEP_ALIVE_SECS,
};
use crate::transport::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub reconnect: ReconnectConfig,
    pub topics: TopicsSection,
    pub storage: StorageSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// Client identifier; empty means generate one and persist it
    pub client_id: String,
    pub use_tls: bool,
    /// `tcp` or `websocket`
    pub transport: ConnectionProtocol,
    pub ws_path: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            client_id: defaults.client_id,
            use_tls: defaults.use_tls,
            transport: defaults.protocol,
            ws_path: defaults.ws_path,
            keep_alive_secs: defaults.keep_alive_secs,
            clean_session: defaults.clean_session,
            username_env: None,
            password_env: None,
        }
    }
}

impl BrokerSection {
    /// Connection parameters with credentials resolved from the environment
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            use_tls: self.use_tls,
            protocol: self.transport,
            ws_path: self.ws_path.clone(),
            keep_alive_secs: self.keep_alive_secs,
            clean_session: self.clean_session,
            credentials: self.credentials(),
        }
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }

    fn credentials(&self) -> Option<Credentials> {
        self.get_mqtt_username().map(|username| Credentials {
            username,
            password: self.get_mqtt_password().unwrap_or_default(),
        })
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Dashboard topics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicsSection {
    /// Topics carrying temperature/humidity readings
    pub sensors: Vec<String>,
    /// Topics carrying on/off/toggle commands
    pub devices: Vec<String>,
    pub default_qos: QoS,
}

/// Persisted state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSection {
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dashlink-state.json"),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }

        if self.broker.keep_alive_secs > MAX_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keep_alive_secs must be at most {MAX_KEEP_ALIVE_SECS}"
            )));
        }

        HealthMonitor::validate_connection_config(&self.reconnect)
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;

        for topic in self.topics.sensors.iter().chain(&self.topics.devices) {
            validate_topic_filter(topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("topics: {e}")))?;
        }

        Ok(())
    }

    pub fn topic_map(&self) -> TopicMap {
        TopicMap::new(
            self.topics.sensors.iter().cloned(),
            self.topics.devices.iter().cloned(),
        )
    }
}
