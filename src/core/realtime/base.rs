//! Base types for realtime coaching sessions.
//!
//! This module defines the vocabulary shared by the session controller and the
//! transports: the session lifecycle states, transcript entries, the error
//! taxonomy and the caller-supplied session configuration with its callbacks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a realtime session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The audio capture device could not be acquired
    #[error("Microphone permission denied: {0}")]
    Permission(String),

    /// The token endpoint failed or returned no usable credential
    #[error("Credential request failed: {0}")]
    Credential(String),

    /// Offer/answer exchange, control channel or WebSocket handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The established connection dropped or reported a protocol error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    /// Whether the error ends the session when it is reported.
    ///
    /// `NotConnected` and `Serialization` are returned from individual sends and
    /// only logged by the controller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::NotConnected | SessionError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a coaching session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started
    #[default]
    Idle,
    /// Capture, credential and handshake are in progress
    Connecting,
    /// Transport established, audio flowing
    Connected,
    /// Session was stopped by the caller
    Disconnected,
    /// Session ended because of a failure
    Error,
}

impl SessionState {
    /// States in which `start()` is a no-op.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle | Disconnected | Error, Connecting)
                | (Connecting, Connected | Disconnected | Error)
                | (Connected, Disconnected | Error)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Transcript
// =============================================================================

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The person practising
    User,
    /// The coaching model
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finished utterance in the session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// RFC 3339 UTC timestamp taken when the utterance was received
    pub timestamp: String,
}

impl TranscriptEntry {
    /// Create an entry stamped with the current time.
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: utc_timestamp(),
        }
    }
}

fn utc_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for finished transcript entries.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptEntry) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for fatal session errors.
pub type SessionErrorCallback =
    Arc<dyn Fn(SessionError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for state transitions.
pub type StateChangeCallback =
    Arc<dyn Fn(SessionState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type receiving the final transcript when a connected session is stopped.
pub type SessionEndCallback =
    Arc<dyn Fn(Vec<TranscriptEntry>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Session Configuration
// =============================================================================

/// Caller-supplied configuration for one controller.
///
/// Immutable for the lifetime of a session. Callbacks are notification sinks
/// and are awaited in the order the controller emits them.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Practice scenario selecting the coaching instructions
    pub scenario_id: Option<String>,
    /// Free-form cultural context forwarded to the token endpoint
    pub cultural_context: Option<String>,
    /// Voice used by the assistant; empty falls back to the client default
    pub voice_id: String,
    pub on_transcript_event: Option<TranscriptCallback>,
    pub on_error: Option<SessionErrorCallback>,
    pub on_state_change: Option<StateChangeCallback>,
    pub on_session_end: Option<SessionEndCallback>,
}

impl SessionConfig {
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            ..Default::default()
        }
    }

    pub fn with_scenario(mut self, scenario_id: impl Into<String>) -> Self {
        self.scenario_id = Some(scenario_id.into());
        self
    }

    pub fn with_cultural_context(mut self, context: impl Into<String>) -> Self {
        self.cultural_context = Some(context.into());
        self
    }

    pub fn on_transcript_event(mut self, callback: TranscriptCallback) -> Self {
        self.on_transcript_event = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: SessionErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn on_state_change(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn on_session_end(mut self, callback: SessionEndCallback) -> Self {
        self.on_session_end = Some(callback);
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("scenario_id", &self.scenario_id)
            .field("cultural_context", &self.cultural_context)
            .field("voice_id", &self.voice_id)
            .field("on_transcript_event", &self.on_transcript_event.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_session_end", &self.on_session_end.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::Error.to_string(), "error");
    }

    #[test]
    fn test_session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }

    #[test]
    fn test_lifecycle_transitions() {
        use SessionState::*;

        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Error));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Error.can_transition_to(Connecting));

        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Error.can_transition_to(Disconnected));
    }

    #[test]
    fn test_is_active() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Disconnected.is_active());
        assert!(!SessionState::Error.is_active());
    }

    #[test]
    fn test_speaker_display() {
        assert_eq!(Speaker::User.to_string(), "user");
        assert_eq!(Speaker::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_transcript_entry_timestamp_is_rfc3339() {
        let entry = TranscriptEntry::now(Speaker::User, "hello");
        assert!(OffsetDateTime::parse(&entry.timestamp, &Rfc3339).is_ok());
        assert_eq!(entry.text, "hello");
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::Permission("denied by user".to_string());
        assert_eq!(err.to_string(), "Microphone permission denied: denied by user");

        let err = SessionError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_fatal_categories() {
        assert!(SessionError::Permission(String::new()).is_fatal());
        assert!(SessionError::Credential(String::new()).is_fatal());
        assert!(SessionError::Handshake(String::new()).is_fatal());
        assert!(SessionError::Transport(String::new()).is_fatal());
        assert!(!SessionError::NotConnected.is_fatal());
        assert!(!SessionError::Serialization(String::new()).is_fatal());
    }

    #[test]
    fn test_session_config_debug_hides_callbacks() {
        let config = SessionConfig::new("alloy")
            .with_scenario("team-standup")
            .on_error(Arc::new(|_| Box::pin(async {})));
        let debug = format!("{config:?}");
        assert!(debug.contains("team-standup"));
        assert!(debug.contains("on_error: true"));
        assert!(debug.contains("on_state_change: false"));
    }
}
