//! Configuration module for the call bridge gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `timing`: bridge lifecycle timing knobs (inactivity, reaping, reattach)
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use zeroize::Zeroize;

use crate::core::realtime::{DEFAULT_AI_MODEL, DEFAULT_AI_REALTIME_URL};

pub mod timing;
mod yaml;

pub use timing::{ReattachPolicy, TimingPolicy};

use yaml::YamlConfig;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PLATFORM_BASE_URL: &str = "http://127.0.0.1:8081";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or validating configuration
///
/// Any of these aborts startup; a gateway with a broken configuration must
/// not accept calls.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value for {name}: {detail}")]
    InvalidValue { name: String, detail: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

fn invalid(name: &str, detail: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        detail: detail.into(),
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Deployment environment the gateway runs in
///
/// Controls how strictly WebSocket origins are enforced and whether the
/// browser playground is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Developer workstation. Lenient origin checks, playground enabled.
    #[default]
    Local,
    /// Shared development / staging deployment. Lenient origin checks,
    /// playground enabled.
    Development,
    /// Production deployment. Origin allow-list is mandatory and the
    /// playground is not served.
    Production,
}

impl Environment {
    /// Parse an environment name, accepting the common short aliases
    pub fn parse(value: &str) -> ConfigResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(invalid(
                "environment",
                format!("unknown environment `{other}` (expected local, development, or production)"),
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Production => "production",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Sections
// ============================================================================

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// An HTTP action endpoint the AI agent can invoke as a function call
///
/// Each entry becomes a registered function handler: the AI sees `name`,
/// `description`, and `parameters` as a tool definition, and invocations
/// POST the arguments to `url`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEndpointConfig {
    pub name: String,
    pub description: String,
    /// JSON schema for the function arguments
    #[serde(default = "default_action_parameters")]
    pub parameters: serde_json::Value,
    pub url: String,
    /// Bearer token sent with each invocation
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-invocation HTTP timeout
    #[serde(default = "default_action_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_action_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_action_timeout_ms() -> u64 {
    8_000
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port, TLS)
/// - AI realtime provider settings (URL, model, API key)
/// - Platform backend settings (agent configs, credit, call logs)
/// - Security settings (origins, CORS, rate limiting, connection limits)
/// - Bridge timing policy
/// - Action endpoints exposed to the AI as callable functions
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Deployment environment
    pub environment: Environment,

    // AI realtime provider
    pub openai_api_key: Option<String>,
    pub ai_realtime_url: String,
    pub ai_model: String,

    // Platform backend
    pub platform_base_url: String,
    pub platform_api_key: Option<String>,

    // Security settings
    /// Origins allowed to open telephony/playground WebSockets.
    /// Empty means any origin outside production.
    pub allowed_ws_origins: Vec<String>,
    /// CORS for the HTTP API. None disables CORS entirely, "*" allows any
    /// origin, otherwise a comma-separated list of exact origins.
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    /// Server-wide cap on concurrent WebSocket sessions. None means unlimited.
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,

    // Bridge timing policy
    pub timing: TimingPolicy,

    // Action endpoints (YAML only)
    pub actions: Vec<ActionEndpointConfig>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Recognized variables: `HOST`, `PORT`, `TLS_CERT_PATH`, `TLS_KEY_PATH`,
    /// `ENVIRONMENT`, `OPENAI_API_KEY`, `AI_REALTIME_URL`, `AI_MODEL`,
    /// `PLATFORM_BASE_URL`, `PLATFORM_API_KEY`, `ALLOWED_WS_ORIGINS`,
    /// `CORS_ALLOWED_ORIGINS`, `RATE_LIMIT_REQUESTS_PER_SECOND`,
    /// `RATE_LIMIT_BURST_SIZE`, `MAX_WEBSOCKET_CONNECTIONS`,
    /// `MAX_CONNECTIONS_PER_IP`, plus the `BRIDGE_*` timing variables.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// Values present in the file override environment variables; anything
    /// the file omits falls back to the environment and then to defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let yaml: YamlConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::load_env()?;
        config.apply_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from the environment without validating it.
    /// YAML values may still fill in what the environment is missing.
    fn load_env() -> ConfigResult<Self> {
        let environment = match env_opt("ENVIRONMENT") {
            Some(raw) => Environment::parse(&raw)?,
            None => Environment::default(),
        };

        let tls = match (env_opt("TLS_CERT_PATH"), env_opt("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(invalid(
                    "tls",
                    "TLS_CERT_PATH and TLS_KEY_PATH must both be set to enable TLS",
                ));
            }
        };

        Ok(Self {
            host: env_string("HOST", DEFAULT_HOST),
            port: env_parse("PORT")?.unwrap_or(DEFAULT_PORT),
            tls,
            environment,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            ai_realtime_url: env_string("AI_REALTIME_URL", DEFAULT_AI_REALTIME_URL),
            ai_model: env_string("AI_MODEL", DEFAULT_AI_MODEL),
            platform_base_url: env_string("PLATFORM_BASE_URL", DEFAULT_PLATFORM_BASE_URL),
            platform_api_key: env_opt("PLATFORM_API_KEY"),
            allowed_ws_origins: env_list("ALLOWED_WS_ORIGINS"),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or(60),
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10),
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?.unwrap_or(100),
            timing: TimingPolicy::from_env(),
            actions: Vec::new(),
        })
    }

    /// Overlay YAML values onto this config
    fn apply_yaml(&mut self, yaml: YamlConfig) -> ConfigResult<()> {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(tls) = server.tls {
                if tls.enabled.unwrap_or(true) {
                    match (tls.cert_path, tls.key_path) {
                        (Some(cert), Some(key)) => {
                            self.tls = Some(TlsConfig {
                                cert_path: cert.into(),
                                key_path: key.into(),
                            });
                        }
                        _ => {
                            return Err(invalid(
                                "server.tls",
                                "cert_path and key_path are required when TLS is enabled",
                            ));
                        }
                    }
                } else {
                    self.tls = None;
                }
            }
        }

        if let Some(raw) = yaml.environment {
            self.environment = Environment::parse(&raw)?;
        }

        if let Some(ai) = yaml.ai {
            if let Some(key) = ai.api_key {
                self.openai_api_key = Some(key);
            }
            if let Some(url) = ai.realtime_url {
                self.ai_realtime_url = url;
            }
            if let Some(model) = ai.model {
                self.ai_model = model;
            }
        }

        if let Some(platform) = yaml.platform {
            if let Some(url) = platform.base_url {
                self.platform_base_url = url;
            }
            if let Some(key) = platform.api_key {
                self.platform_api_key = Some(key);
            }
        }

        if let Some(security) = yaml.security {
            if let Some(origins) = security.allowed_ws_origins {
                self.allowed_ws_origins = origins;
            }
            if let Some(cors) = security.cors_allowed_origins {
                self.cors_allowed_origins = Some(cors);
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
            if let Some(max) = security.max_websocket_connections {
                self.max_websocket_connections = Some(max);
            }
            if let Some(max) = security.max_connections_per_ip {
                self.max_connections_per_ip = max;
            }
        }

        if let Some(timing) = yaml.timing {
            self.timing = timing;
        }

        if let Some(actions) = yaml.actions {
            self.actions = actions;
        }

        Ok(())
    }

    /// Validate the assembled configuration
    ///
    /// Called by both loaders; a config that fails here never reaches the
    /// server loop.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(invalid("port", "must be non-zero"));
        }

        match &self.openai_api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(invalid(
                    "openai_api_key",
                    "an AI API key is required (set OPENAI_API_KEY or ai.api_key)",
                ));
            }
        }

        if self.environment == Environment::Production && self.allowed_ws_origins.is_empty() {
            return Err(invalid(
                "allowed_ws_origins",
                "production requires an explicit WebSocket origin allow-list",
            ));
        }

        if self.rate_limit_requests_per_second == 0 {
            return Err(invalid("rate_limit_requests_per_second", "must be at least 1"));
        }
        if self.rate_limit_burst_size == 0 {
            return Err(invalid("rate_limit_burst_size", "must be at least 1"));
        }
        if self.max_connections_per_ip == 0 {
            return Err(invalid("max_connections_per_ip", "must be at least 1"));
        }
        if self.timing.audio_buffer_frames == 0 {
            return Err(invalid("timing.audio_buffer_frames", "must be at least 1"));
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Err(invalid("actions", "action name must not be empty"));
            }
            if action.url.trim().is_empty() {
                return Err(invalid(
                    "actions",
                    format!("action `{}` has an empty url", action.name),
                ));
            }
            if !seen.insert(action.name.clone()) {
                return Err(invalid(
                    "actions",
                    format!("duplicate action name `{}`", action.name),
                ));
            }
        }

        Ok(())
    }

    /// Socket address string the server binds to
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS is configured
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether WebSocket upgrades must present an allow-listed Origin header
    pub fn enforces_origin_allow_list(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Whether the browser playground endpoint is served
    pub fn playground_enabled(&self) -> bool {
        !matches!(self.environment, Environment::Production)
    }
}

impl Drop for ServerConfig {
    /// Zero out secrets when the config is dropped
    fn drop(&mut self) {
        if let Some(key) = self.openai_api_key.as_mut() {
            key.zeroize();
        }
        if let Some(key) = self.platform_api_key.as_mut() {
            key.zeroize();
        }
        for action in &mut self.actions {
            if let Some(key) = action.api_key.as_mut() {
                key.zeroize();
            }
        }
    }
}

// ============================================================================
// Environment variable helpers
// ============================================================================

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env_opt(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, format!("cannot parse `{raw}`"))),
        None => Ok(None),
    }
}

fn env_list(name: &str) -> Vec<String> {
    env_opt(name)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
