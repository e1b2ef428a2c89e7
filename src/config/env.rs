use std::env;
use std::str::FromStr;

use super::{ClientConfig, ConfigError};
use crate::core::realtime::TransportKind;

/// Every environment variable the client reads.
pub(super) const ENV_KEYS: &[&str] = &[
    "TOKEN_ENDPOINT_URL",
    "SIGNALING_URL",
    "RELAY_BASE_URL",
    "REALTIME_MODEL",
    "TRANSCRIPTION_MODEL",
    "REALTIME_TRANSPORT",
    "DEFAULT_VOICE",
    "ICE_SERVERS",
    "AUDIO_CHUNK_INTERVAL_MS",
    "CONNECT_TIMEOUT_MS",
    "CONTROL_CHANNEL_TIMEOUT_MS",
    "HTTP_TIMEOUT_SECS",
];

/// Overlay environment variables on `config`.
///
/// Unset and empty variables leave the existing value in place.
pub(super) fn apply_env(mut config: ClientConfig) -> Result<ClientConfig, ConfigError> {
    if let Some(url) = read_string("TOKEN_ENDPOINT_URL") {
        config.token_endpoint_url = url;
    }
    if let Some(url) = read_string("SIGNALING_URL") {
        config.signaling_url = url;
    }
    if let Some(url) = read_string("RELAY_BASE_URL") {
        config.relay_base_url = url;
    }
    if let Some(model) = read_string("REALTIME_MODEL") {
        config.model = model;
    }
    if let Some(model) = read_string("TRANSCRIPTION_MODEL") {
        config.transcription_model = model;
    }
    if let Some(transport) = read_string("REALTIME_TRANSPORT") {
        config.transport = parse_transport("REALTIME_TRANSPORT", &transport)?;
    }
    if let Some(voice) = read_string("DEFAULT_VOICE") {
        config.default_voice = voice;
    }
    if let Some(servers) = read_string("ICE_SERVERS") {
        config.ice_servers = parse_list(&servers);
    }
    if let Some(ms) = read_parsed("AUDIO_CHUNK_INTERVAL_MS")? {
        config.chunk_interval_ms = ms;
    }
    if let Some(ms) = read_parsed("CONNECT_TIMEOUT_MS")? {
        config.connect_timeout_ms = ms;
    }
    if let Some(ms) = read_parsed("CONTROL_CHANNEL_TIMEOUT_MS")? {
        config.control_channel_timeout_ms = ms;
    }
    if let Some(secs) = read_parsed("HTTP_TIMEOUT_SECS")? {
        config.http_timeout_secs = secs;
    }

    Ok(config)
}

pub(super) fn parse_transport(key: &str, value: &str) -> Result<TransportKind, ConfigError> {
    TransportKind::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Split a comma-separated list, dropping empty items.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match read_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}
