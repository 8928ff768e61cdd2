use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub chirpstack: ChirpstackConfig,
    pub mqtt: MqttConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

/// Connection settings for the ChirpStack API gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ChirpstackConfig {
    /// Base URL of the HTTP API, e.g. "http://192.168.0.1:8090"
    pub api_url: String,
    /// API token, sent as a bearer credential on every request
    pub api_token: String,
    /// Application the fleet belongs to
    pub application_id: String,
    /// Tenant that owns the device profiles (optional on some servers)
    pub tenant_id: Option<String>,
}

/// Event bus (MQTT broker) settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Node list file; `None` keeps the registry in memory only
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chirpstack: ChirpstackConfig {
                api_url: "http://127.0.0.1:8090".to_string(),
                api_token: String::new(),
                application_id: String::new(),
                tenant_id: None,
            },
            mqtt: MqttConfig {
                host: "127.0.0.1".to_string(),
                port: 1883,
            },
            registry: RegistryConfig {
                store_path: Some(PathBuf::from("nodes.json")),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
