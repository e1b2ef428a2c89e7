use serde::Deserialize;
use std::path::Path;

use super::env::parse_transport;
use super::{ClientConfig, ConfigError};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// endpoints:
///   token_url: "http://localhost:8000/api/token"
///   signaling_url: "https://api.openai.com/v1/realtime/calls"
///   relay_base_url: "ws://localhost:8000/ws/realtime"
///
/// realtime:
///   model: "gpt-realtime"
///   transcription_model: "gpt-4o-transcribe"
///   transport: "relay"
///   default_voice: "alloy"
///
/// peer:
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// audio:
///   chunk_interval_ms: 100
///
/// timeouts:
///   connect_ms: 10000
///   control_channel_ms: 10000
///   http_secs: 30
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoints: Option<EndpointsYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub peer: Option<PeerYaml>,
    pub audio: Option<AudioYaml>,
    pub timeouts: Option<TimeoutsYaml>,
}

/// Endpoint URLs from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub token_url: Option<String>,
    pub signaling_url: Option<String>,
    pub relay_base_url: Option<String>,
}

/// Realtime session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub transcription_model: Option<String>,
    /// `peer` or `relay`
    pub transport: Option<String>,
    pub default_voice: Option<String>,
}

/// Peer transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PeerYaml {
    pub ice_servers: Option<Vec<String>>,
}

/// Audio capture settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub chunk_interval_ms: Option<u64>,
}

/// Timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub connect_ms: Option<u64>,
    pub control_channel_ms: Option<u64>,
    pub http_secs: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Override `base` with every value present in the YAML.
    pub fn apply(self, mut base: ClientConfig) -> Result<ClientConfig, ConfigError> {
        if let Some(endpoints) = self.endpoints {
            if let Some(url) = endpoints.token_url {
                base.token_endpoint_url = url;
            }
            if let Some(url) = endpoints.signaling_url {
                base.signaling_url = url;
            }
            if let Some(url) = endpoints.relay_base_url {
                base.relay_base_url = url;
            }
        }

        if let Some(realtime) = self.realtime {
            if let Some(model) = realtime.model {
                base.model = model;
            }
            if let Some(model) = realtime.transcription_model {
                base.transcription_model = model;
            }
            if let Some(transport) = realtime.transport {
                base.transport = parse_transport("realtime.transport", &transport)?;
            }
            if let Some(voice) = realtime.default_voice {
                base.default_voice = voice;
            }
        }

        if let Some(servers) = self.peer.and_then(|p| p.ice_servers) {
            base.ice_servers = servers;
        }

        if let Some(ms) = self.audio.and_then(|a| a.chunk_interval_ms) {
            base.chunk_interval_ms = ms;
        }

        if let Some(timeouts) = self.timeouts {
            if let Some(ms) = timeouts.connect_ms {
                base.connect_timeout_ms = ms;
            }
            if let Some(ms) = timeouts.control_channel_ms {
                base.control_channel_timeout_ms = ms;
            }
            if let Some(secs) = timeouts.http_secs {
                base.http_timeout_secs = secs;
            }
        }

        Ok(base)
    }
}
