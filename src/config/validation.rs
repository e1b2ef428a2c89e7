use url::Url;

use super::{ClientConfig, ConfigError};
use crate::core::realtime::RealtimeVoice;

/// Validate a merged configuration.
pub(super) fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_url("token endpoint", &config.token_endpoint_url, &["http", "https"])?;
    validate_url("signaling", &config.signaling_url, &["http", "https"])?;
    validate_url("relay", &config.relay_base_url, &["ws", "wss"])?;

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation("model must not be empty".to_string()));
    }
    if config.transcription_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "transcription model must not be empty".to_string(),
        ));
    }
    if RealtimeVoice::parse(&config.default_voice).is_none() {
        return Err(ConfigError::Validation(format!(
            "unknown default voice '{}'",
            config.default_voice
        )));
    }

    for server in &config.ice_servers {
        validate_url("ICE server", server, &["stun", "turn", "turns"])?;
    }

    for (name, value) in [
        ("chunk interval", config.chunk_interval_ms),
        ("connect timeout", config.connect_timeout_ms),
        ("control channel timeout", config.control_channel_timeout_ms),
        ("HTTP timeout", config.http_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{name} must be greater than zero"
            )));
        }
    }

    Ok(())
}

fn validate_url(name: &str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::Validation(format!("invalid {name} URL '{raw}': {e}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Validation(format!(
            "{name} URL '{raw}' must use one of: {}",
            schemes.join(", ")
        )));
    }

    Ok(())
}
