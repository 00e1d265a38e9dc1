//! Connector configuration loading from file and environment variables.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity and exchange limits of this connector.
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Bearer tokens accepted from peers, mapped to the connector each one
    /// was issued to.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,

    /// Remote audit collaborator.
    #[serde(default)]
    pub clearing_house: ClearingHouseConfig,

    /// Catalog loaded at startup.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "dsc_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Who this connector is and how much work it takes on at once.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// URI identifying this connector; stamped as `issuerConnector`.
    #[serde(default = "default_connector_id")]
    pub id: String,

    /// URI of the agent the connector acts for. Defaults to `id`.
    #[serde(default)]
    pub sender_agent: Option<String>,

    /// Human-readable title used in the self-description.
    #[serde(default)]
    pub title: Option<String>,

    /// Information model version emitted in outbound headers.
    #[serde(default = "default_model_version")]
    pub model_version: String,

    /// Information model versions accepted on inbound headers.
    #[serde(default = "default_inbound_model_versions")]
    pub inbound_model_versions: Vec<String>,

    /// Deadline for outbound calls to peers and data sources.
    #[serde(default = "default_outbound_timeout_ms")]
    pub outbound_timeout_ms: u64,

    /// Capacity of the side-effect bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Maximum number of inbound exchanges processed at once.
    #[serde(default = "default_max_concurrent_exchanges")]
    pub max_concurrent_exchanges: usize,

    /// Credential attached to outbound messages.
    #[serde(default)]
    pub security_token: Option<String>,
}

/// Remote clearing-house settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearingHouseConfig {
    /// Endpoint recorded outcomes are posted to. Nothing is forwarded when
    /// unset.
    #[serde(default)]
    pub url: Option<String>,
}

/// Startup catalog settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    /// JSON file holding one catalog or an array of catalogs.
    #[serde(default)]
    pub catalog: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "dsc.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connector_id() -> String {
    "https://localhost:8080".to_string()
}

fn default_model_version() -> String {
    "4.2.7".to_string()
}

fn default_inbound_model_versions() -> Vec<String> {
    vec!["4.2.7".to_string()]
}

fn default_outbound_timeout_ms() -> u64 {
    10_000
}

fn default_bus_capacity() -> usize {
    256
}

fn default_max_concurrent_exchanges() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            id: default_connector_id(),
            sender_agent: None,
            title: None,
            model_version: default_model_version(),
            inbound_model_versions: default_inbound_model_versions(),
            outbound_timeout_ms: default_outbound_timeout_ms(),
            bus_capacity: default_bus_capacity(),
            max_concurrent_exchanges: default_max_concurrent_exchanges(),
            security_token: None,
        }
    }
}

impl ConnectorConfig {
    /// Returns the sender agent, falling back to the connector id.
    pub fn sender_agent(&self) -> &str {
        self.sender_agent.as_deref().unwrap_or(&self.id)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DSC_HOST` overrides `server.host`
/// - `DSC_PORT` overrides `server.port`
/// - `DSC_DB_PATH` overrides `database.path`
/// - `DSC_LOG_LEVEL` overrides `logging.level`
/// - `DSC_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `DSC_CONNECTOR_ID` overrides `connector.id`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the connector id is not an absolute URI.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("DSC_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("DSC_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("DSC_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("DSC_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("DSC_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(id) = std::env::var("DSC_CONNECTOR_ID") {
        config.connector.id = id;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    url::Url::parse(&config.connector.id).map_err(|e| {
        ConfigError::Invalid(format!(
            "connector.id '{}' is not an absolute URI: {}",
            config.connector.id, e
        ))
    })?;
    if config.connector.inbound_model_versions.is_empty() {
        return Err(ConfigError::Invalid(
            "connector.inbound_model_versions must not be empty".to_string(),
        ));
    }
    if config.connector.max_concurrent_exchanges == 0 || config.connector.bus_capacity == 0 {
        return Err(ConfigError::Invalid(
            "connector.max_concurrent_exchanges and connector.bus_capacity must be positive"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.connector.model_version, "4.2.7");
        assert_eq!(config.connector.sender_agent(), config.connector.id);
        assert!(config.peers.is_empty());
        assert!(config.clearing_house.url.is_none());
    }

    #[test]
    fn sections_parse_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [connector]
            id = "https://provider.example.com"
            inbound_model_versions = ["4.0.0", "4.2.7"]
            outbound_timeout_ms = 2500

            [peers]
            "token-consumer" = "https://consumer.example.com"

            [clearing_house]
            url = "https://clearing.example.com/messages"
            "#,
        )
        .unwrap();

        assert_eq!(config.connector.id, "https://provider.example.com");
        assert_eq!(config.connector.inbound_model_versions.len(), 2);
        assert_eq!(config.connector.outbound_timeout_ms, 2500);
        assert_eq!(
            config.peers.get("token-consumer").map(String::as_str),
            Some("https://consumer.example.com")
        );
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn relative_connector_id_is_rejected() {
        let mut config = Config::default();
        config.connector.id = "provider".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.database.pool_max_size, 8);
    }
}
