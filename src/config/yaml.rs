use serde::Deserialize;

use super::ActionEndpointConfig;
use super::timing::TimingPolicy;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values present in the file
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///   tls:
///     enabled: true
///     cert_path: "/etc/certs/server.pem"
///     key_path: "/etc/certs/server.key"
///
/// environment: "production"
///
/// ai:
///   api_key: "sk-your-key"
///   realtime_url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///
/// platform:
///   base_url: "https://platform.internal:8081"
///   api_key: "platform-secret"
///
/// security:
///   allowed_ws_origins:
///     - "https://app.example.com"
///   cors_allowed_origins: "https://app.example.com,https://console.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 5000
///   max_connections_per_ip: 100
///
/// timing:
///   inactivity_timeout_ms: 120000
///   audio_buffer_frames: 50
///
/// actions:
///   - name: "lookup_order"
///     description: "Look up an order by its id"
///     url: "https://actions.example.com/lookup_order"
///     api_key: "action-secret"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub environment: Option<String>,
    pub ai: Option<AiYaml>,
    pub platform: Option<PlatformYaml>,
    pub security: Option<SecurityYaml>,
    pub timing: Option<TimingPolicy>,
    pub actions: Option<Vec<ActionEndpointConfig>>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// AI realtime provider configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AiYaml {
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub model: Option<String>,
}

/// Platform backend configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlatformYaml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub allowed_ws_origins: Option<Vec<String>>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}
