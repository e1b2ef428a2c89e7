//! Realtime protocol message types.
//!
//! Both transports carry the same JSON events: over the `oai-events` data
//! channel for the peer transport, and as WebSocket text frames for the relay.
//!
//! # Protocol Overview
//!
//! Client events (sent by this crate):
//! - session.update - Configure model, voice, instructions and transcription
//! - input_audio_buffer.append - Append base64 audio (relay only)
//! - conversation.item.create - Add a typed user message
//! - response.create - Ask the model to respond
//! - response.cancel - Cancel the in-flight assistant turn
//!
//! Server events (interpreted by the normalizer):
//! - conversation.item.input_audio_transcription.completed - User utterance
//! - response.audio_transcript.done - Assistant utterance
//! - response.audio.delta - Assistant audio chunk
//! - response.done - Response complete
//! - session.created - Session created
//! - error - Error occurred

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Session type sent with every `session.update`.
pub const REALTIME_SESSION_TYPE: &str = "realtime";

// =============================================================================
// Session Configuration
// =============================================================================

/// Session settings sent in `session.update` once the control channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session type (always "realtime")
    #[serde(rename = "type")]
    pub session_type: String,
    /// Realtime model
    pub model: String,
    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    /// Assistant voice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl SessionSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            session_type: REALTIME_SESSION_TYPE.to_string(),
            model: model.into(),
            instructions: None,
            input_audio_transcription: None,
            voice: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_transcription_model(mut self, model: impl Into<String>) -> Self {
        self.input_audio_transcription = Some(InputAudioTranscription {
            model: model.into(),
        });
        self
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model
    pub model: String,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    pub role: String,
    /// Content parts
    pub content: Vec<ContentPart>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    pub text: String,
}

impl ConversationItem {
    /// A typed user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                content_type: "input_text".to_string(),
                text: text.into(),
            }],
        }
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionSettings,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Create a user text item event.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }

    /// Wire name of the event, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }

    /// Serialize to the JSON text carried by either transport.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events the session cares about.
///
/// Everything else deserializes to [`ServerEvent::Unrecognized`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ErrorPayload,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information (model provider)
        #[serde(default)]
        session: Option<SessionInfo>,
        /// Session identifier (relay)
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        transcript: String,
    },

    /// Assistant audio transcript complete
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AudioTranscriptDone {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript
        transcript: String,
    },

    /// Assistant audio chunk
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio
        delta: String,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// Any event kind this crate does not interpret
    #[serde(other)]
    Unrecognized,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Error body of an `error` event.
///
/// The model provider sends an object; the relay sends a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Detailed(ApiError),
    Message(String),
}

impl ErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            ErrorPayload::Detailed(err) => &err.message,
            ErrorPayload::Message(message) => message,
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

/// Session information.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    #[serde(default)]
    pub id: Option<String>,
    /// Model used
    #[serde(default)]
    pub model: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
}
