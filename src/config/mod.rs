//! Client configuration for coaching sessions
//!
//! Endpoints and tunables are loaded from several sources with the priority
//! YAML > ENV vars > .env values > defaults. The `.env` file is loaded into the
//! process environment by the binary at startup.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use coach_realtime::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("coach.yaml"))?;
//! println!("Using the {} transport", config.transport);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::realtime::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, RealtimeVoice, TransportKind,
};

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

pub const DEFAULT_TOKEN_ENDPOINT_URL: &str = "http://localhost:8000/api/token";
pub const DEFAULT_SIGNALING_URL: &str = "https://api.openai.com/v1/realtime/calls";
pub const DEFAULT_RELAY_BASE_URL: &str = "ws://localhost:8000/ws/realtime";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Client configuration
///
/// Contains the endpoints a session talks to and the timing knobs of the
/// transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    // Endpoints
    pub token_endpoint_url: String,
    pub signaling_url: String,
    pub relay_base_url: String,

    // Realtime session
    pub model: String,
    pub transcription_model: String,
    pub transport: TransportKind,
    pub default_voice: String,

    // Peer transport
    /// STUN/TURN URLs used when gathering ICE candidates
    pub ice_servers: Vec<String>,

    // Timing
    pub chunk_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub control_channel_timeout_ms: u64,
    pub http_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_endpoint_url: DEFAULT_TOKEN_ENDPOINT_URL.to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            relay_base_url: DEFAULT_RELAY_BASE_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            transport: TransportKind::default(),
            default_voice: RealtimeVoice::default().as_str().to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            chunk_interval_ms: 100,
            connect_timeout_ms: 10_000,
            control_channel_timeout_ms: 10_000,
            http_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables over the defaults
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the merged
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::apply_env(Self::default())?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let base = env::apply_env(Self::default())?;
        let config = yaml_config.apply(base)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Validate the configuration as-is.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn control_channel_timeout(&self) -> Duration {
        Duration::from_millis(self.control_channel_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
