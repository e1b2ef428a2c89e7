//! Realtime voice sessions with a speech model.
//!
//! A [`SessionController`] negotiates one of two interchangeable transports,
//! streams microphone audio, and turns inbound protocol events into a
//! transcript.
//!
//! # Transports
//!
//! - **Peer** - direct media path negotiated by an SDP offer/answer exchange,
//!   with control events on the `oai-events` data channel
//! - **Relay** - one WebSocket to the relay server carrying base64 audio
//!   chunks and control events
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, at 24kHz.
//!
//! # Example
//!
//! ```rust,ignore
//! use coach_realtime::config::ClientConfig;
//! use coach_realtime::core::realtime::{HostCapabilities, SessionConfig, SessionController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::new("alloy")
//!         .with_scenario("conflict-resolution")
//!         .on_transcript_event(Arc::new(|entry| Box::pin(async move {
//!             println!("[{}] {}", entry.speaker, entry.text);
//!         })));
//!
//!     let controller =
//!         SessionController::with_host(config, ClientConfig::from_env()?, host)?;
//!     controller.start().await;
//!     controller.send_text("Can we talk about the deadline?").await;
//!     let transcript = controller.stop().await;
//! }
//! ```

mod base;
pub mod credential;
pub mod devices;
pub mod messages;
pub mod normalizer;
mod notifier;
pub mod peer;
pub mod relay;
pub mod scenario;
mod session;
pub mod transport;
mod voice;

pub use base::{
    SessionConfig, SessionEndCallback, SessionError, SessionErrorCallback, SessionResult,
    SessionState, Speaker, StateChangeCallback, TranscriptCallback, TranscriptEntry,
};
pub use credential::{
    Credential, CredentialProvider, HttpCredentialProvider, TokenRequest, TokenSessionConfig,
};
pub use devices::{
    AudioInput, AudioOutput, DataChannel, DataChannelEvent, HostCapabilities, MicrophoneStream,
    NullAudioOutput, PeerConnection, PeerConnector,
};
pub use messages::{ClientEvent, ServerEvent, SessionSettings};
pub use normalizer::{NormalizedEvent, normalize};
pub use peer::{
    CONTROL_CHANNEL_LABEL, PeerTransport, PeerTransportSettings, WebRtcPeerConnector,
};
pub use relay::{RelayTransport, RelayTransportSettings};
pub use scenario::{PracticeScenario, instructions_for};
pub use session::{SessionController, format_duration};
pub use transport::{
    BoxedTransport, ControlSender, HostTransportFactory, RealtimeTransport, TransportEvent,
    TransportFactory, TransportKind,
};
pub use voice::{
    DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, REALTIME_SAMPLE_RATE, RealtimeVoice,
};
