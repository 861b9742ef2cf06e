//! Configuration for voicebridge
//!
//! Settings are layered: built-in defaults, then `config/default.yaml`, then
//! `config/{env}.yaml`, then `VOICEBRIDGE__`-prefixed environment variables.

pub mod constants;
mod settings;

pub use settings::{
    load_settings, AgentConfig, AuthConfig, ConfigError, IceConfig, LlmConfig,
    ObservabilityConfig, RuntimeEnvironment, ServerConfig, Settings, SttConfig, TtsConfig,
    TurnServerConfig,
};
