//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::constants::{service, webrtc};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// ICE server configuration handed to both peers
    #[serde(default)]
    pub ice: IceConfig,

    /// Speech-to-text service
    #[serde(default)]
    pub stt: SttConfig,

    /// Completion (language model) service
    #[serde(default)]
    pub llm: LlmConfig,

    /// Speech-synthesis service
    #[serde(default)]
    pub tts: TtsConfig,

    /// Assistant persona and greeting
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, advertised by the discovery endpoint
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Enforce the CORS origin list (false = permissive, dev only)
    #[serde(default)]
    pub cors_enabled: bool,

    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Bearer-token authentication
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    7860
}

fn default_public_url() -> String {
    format!("http://localhost:{}", default_port())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: default_public_url(),
            cors_enabled: false,
            cors_origins: Vec::new(),
            auth: AuthConfig::default(),
        }
    }
}

/// Bearer-token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Require `Authorization: Bearer <api_key>` on signaling endpoints
    #[serde(default)]
    pub enabled: bool,

    /// Expected API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Path prefixes that bypass authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            public_paths: default_public_paths(),
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IceConfig {
    /// STUN server URLs; empty means the public default is used
    #[serde(default)]
    pub stun_servers: Vec<String>,

    /// TURN servers with credentials
    #[serde(default)]
    pub turn_servers: Vec<TurnServerConfig>,
}

/// One TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Speech-to-text service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// API key; read from `VOICEBRIDGE__STT__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_stt_model")]
    pub model: String,
}

fn default_stt_endpoint() -> String {
    "https://api.deepgram.com/v1/listen".to_string()
}

fn default_stt_model() -> String {
    "nova-2".to_string()
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_stt_endpoint(),
            model: default_stt_model(),
        }
    }
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key; read from `VOICEBRIDGE__LLM__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,

    /// Retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_call_timeout() -> u64 {
    service::CALL_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    service::MAX_RETRIES
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_call_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Speech-synthesis service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// API key; read from `VOICEBRIDGE__TTS__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_tts_voice")]
    pub voice_id: String,
}

fn default_tts_endpoint() -> String {
    "https://api.cartesia.ai/tts/bytes".to_string()
}

fn default_tts_voice() -> String {
    "bdab08ad-4137-4548-b9db-6142854c7525".to_string()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_tts_endpoint(),
            voice_id: default_tts_voice(),
        }
    }
}

/// Assistant persona configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instruction encoding the assistant persona
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Directive for the opening turn when no display name is known
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_persona() -> String {
    "You are a friendly voice assistant. Keep answers concise (2-3 sentences) \
     unless asked to elaborate, and speak naturally - your words will be read \
     aloud."
        .to_string()
}

fn default_greeting() -> String {
    "Say hello and briefly introduce yourself.".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            greeting: default_greeting(),
        }
    }
}

impl AgentConfig {
    /// Greeting directive, personalized when a display name is known
    pub fn greeting_directive(&self, display_name: Option<&str>) -> String {
        match display_name {
            Some(name) if !name.trim().is_empty() => format!(
                "Say hello to {} by name and briefly introduce yourself.",
                name.trim()
            ),
            _ => self.greeting.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; called at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.timeout_secs must be non-zero".into(),
            ));
        }
        if self.server.auth.enabled
            && self
                .server
                .auth
                .api_key
                .as_deref()
                .map_or(true, |k| k.is_empty())
        {
            return Err(ConfigError::Invalid(
                "auth is enabled but no API key is configured".into(),
            ));
        }
        for url in &self.ice.stun_servers {
            if !url.starts_with("stun:") {
                return Err(ConfigError::Invalid(format!(
                    "stun server url must start with 'stun:': {url}"
                )));
            }
        }
        Ok(())
    }

    /// Check that the external service credentials needed to start a bot
    /// task are present. A miss here is a fatal setup error: the offer is
    /// refused before an answer is produced.
    pub fn require_service_credentials(&self) -> Result<(), ConfigError> {
        if self.stt.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingCredential("stt.api_key"));
        }
        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingCredential("llm.api_key"));
        }
        if self.tts.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingCredential("tts.api_key"));
        }
        Ok(())
    }

    /// ICE server URLs to use, falling back to the public default STUN server
    pub fn ice_server_urls(&self) -> Vec<String> {
        if self.ice.stun_servers.is_empty() {
            vec![webrtc::DEFAULT_STUN_URL.to_string()]
        } else {
            self.ice.stun_servers.clone()
        }
    }
}

/// Load settings from files and environment
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = Path::new("config/default.yaml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    if let Some(env_name) = env {
        let env_path_buf = format!("config/{env_name}.yaml");
        let env_path = Path::new(&env_path_buf);
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        } else {
            tracing::warn!(path = %env_path_buf, "Environment config file not found, skipping");
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICEBRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_service_credentials(),
            Err(ConfigError::MissingCredential("stt.api_key"))
        ));

        let mut settings = Settings::default();
        settings.stt.api_key = Some("dg-key".into());
        settings.llm.api_key = Some("sk-key".into());
        settings.tts.api_key = Some("ca-key".into());
        assert!(settings.require_service_credentials().is_ok());
    }

    #[test]
    fn test_ice_server_fallback() {
        let settings = Settings::default();
        let urls = settings.ice_server_urls();
        assert_eq!(urls, vec![webrtc::DEFAULT_STUN_URL.to_string()]);

        let mut settings = Settings::default();
        settings.ice.stun_servers = vec!["stun:stun.example.org:3478".into()];
        assert_eq!(settings.ice_server_urls(), settings.ice.stun_servers);
    }

    #[test]
    fn test_auth_requires_key_when_enabled() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        assert!(settings.validate().is_err());

        settings.server.auth.api_key = Some("secret".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_greeting_personalization() {
        let agent = AgentConfig::default();
        assert_eq!(agent.greeting_directive(None), agent.greeting);
        let personalized = agent.greeting_directive(Some("Priya"));
        assert!(personalized.contains("Priya"));
        // Blank names fall back to the generic directive
        assert_eq!(agent.greeting_directive(Some("  ")), agent.greeting);
    }
}
