//! Maps inbound protocol messages from either transport to one event shape.
//!
//! Normalization never fails: malformed JSON, missing fields and unknown kinds
//! all become [`NormalizedEvent::Ignored`].

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::base::{Speaker, TranscriptEntry};
use super::messages::ServerEvent;

/// Internal view of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    /// A finished user or assistant utterance
    Transcript(TranscriptEntry),
    /// The remote side reported an error
    ProtocolError { message: String },
    /// Decoded assistant audio (PCM16, 24kHz, mono)
    AudioDelta(Bytes),
    /// The assistant finished a response
    ResponseDone { response_id: Option<String> },
    /// The remote session was created
    SessionCreated { session_id: Option<String> },
    /// Anything the session does not act on
    Ignored,
}

/// Normalize raw control-channel text.
pub fn normalize(raw: &str) -> NormalizedEvent {
    match serde_json::from_str::<ServerEvent>(raw) {
        Ok(event) => normalize_event(event),
        Err(e) => {
            debug!("Ignoring unparseable realtime message: {}", e);
            NormalizedEvent::Ignored
        }
    }
}

/// Normalize an already-decoded server event.
pub fn normalize_event(event: ServerEvent) -> NormalizedEvent {
    match event {
        ServerEvent::TranscriptionCompleted { transcript, .. } => {
            NormalizedEvent::Transcript(TranscriptEntry::now(Speaker::User, transcript))
        }
        ServerEvent::AudioTranscriptDone { transcript, .. } => {
            NormalizedEvent::Transcript(TranscriptEntry::now(Speaker::Assistant, transcript))
        }
        ServerEvent::Error { error } => NormalizedEvent::ProtocolError {
            message: error.message().to_string(),
        },
        ServerEvent::AudioDelta { delta } => match ServerEvent::decode_audio_delta(&delta) {
            Ok(audio) => NormalizedEvent::AudioDelta(Bytes::from(audio)),
            Err(e) => {
                warn!("Dropping undecodable audio delta: {}", e);
                NormalizedEvent::Ignored
            }
        },
        ServerEvent::ResponseDone { response } => NormalizedEvent::ResponseDone {
            response_id: response.and_then(|r| r.id),
        },
        ServerEvent::SessionCreated {
            session,
            session_id,
        } => NormalizedEvent::SessionCreated {
            session_id: session_id.or_else(|| session.and_then(|s| s.id)),
        },
        ServerEvent::Unrecognized => {
            trace!("Ignoring unrecognized realtime event");
            NormalizedEvent::Ignored
        }
    }
}
