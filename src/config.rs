use crate::forward::ForwarderSettings;
use crate::network::listener::ListenerSettings;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Process-level settings. Tenants themselves live in the tenants file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    #[serde(default = "default_tenants_file")]
    pub tenants_file: PathBuf,

    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// 0 disables TCP keepalive on accepted sockets
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_token_timeout")]
    pub token_timeout_ms: u64,

    #[serde(default = "default_token_refresh_margin")]
    pub token_refresh_margin_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,

    #[serde(default = "default_admin_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            tenants_file: default_tenants_file(),
            reload_interval_secs: default_reload_interval(),
            tcp_nodelay: default_tcp_nodelay(),
            tcp_keepalive_secs: default_tcp_keepalive(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            token_timeout_ms: default_token_timeout(),
            token_refresh_margin_secs: default_token_refresh_margin(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_admin_enabled(),
            bind: default_admin_bind(),
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

// Default value functions
fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_tenants_file() -> PathBuf {
    PathBuf::from("tenants.json")
}
fn default_reload_interval() -> u64 {
    60
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_tcp_keepalive() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    5000
}
fn default_token_timeout() -> u64 {
    5000
}
fn default_token_refresh_margin() -> u64 {
    10
}
fn default_admin_enabled() -> bool {
    true
}
fn default_admin_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "plain".to_string()
}

impl Config {
    pub fn listener_settings(&self) -> Result<ListenerSettings, ConfigError> {
        let listen_ip = parse_listen_ip(&self.gateway.listen_ip)?;
        let tcp_keepalive = match self.gateway.tcp_keepalive_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(ListenerSettings {
            listen_ip,
            tcp_nodelay: self.gateway.tcp_nodelay,
            tcp_keepalive,
        })
    }

    pub fn forwarder_settings(&self) -> ForwarderSettings {
        ForwarderSettings {
            request_timeout: Duration::from_millis(self.forward.request_timeout_ms),
            token_timeout: Duration::from_millis(self.forward.token_timeout_ms),
            token_refresh_margin: Duration::from_secs(self.forward.token_refresh_margin_secs),
        }
    }

    pub fn admin_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_admin_bind(&self.admin.bind)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.gateway.reload_interval_secs)
    }
}

fn parse_listen_ip(value: &str) -> Result<IpAddr, ConfigError> {
    value.parse::<IpAddr>().map_err(|e| {
        ConfigError::ValidationError(format!("Invalid listen IP '{}': {}", value, e))
    })
}

fn parse_admin_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse::<SocketAddr>().map_err(|e| {
        ConfigError::ValidationError(format!("Invalid admin bind address '{}': {}", value, e))
    })
}

/// Load configuration from file. A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        Some(path) => {
            tracing::warn!(
                "Config file {} not found; using defaults",
                path.display()
            );
            Config::default()
        }
        None => Config::default(),
    };

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    parse_listen_ip(&config.gateway.listen_ip)?;

    if config.admin.enabled {
        parse_admin_bind(&config.admin.bind)?;
    }

    if config.gateway.reload_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reload_interval_secs must be greater than 0".to_string(),
        ));
    }

    if config.forward.request_timeout_ms == 0 || config.forward.token_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "forward timeouts must be greater than 0".to_string(),
        ));
    }

    Ok(())
}
