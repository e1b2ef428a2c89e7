//! Host capabilities the transports depend on.
//!
//! Audio capture, audio playback and the peer connection are provided by the
//! embedding host. The transports only see these traits, so a native audio
//! stack, a WebRTC library or a test double can be plugged in. The crate ships
//! a `webrtc` based connector in [`peer::WebRtcPeerConnector`](super::peer::WebRtcPeerConnector).

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::base::SessionResult;

// =============================================================================
// Audio
// =============================================================================

/// Source of microphone streams.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire the capture device.
    ///
    /// A denied or unavailable device is reported as
    /// [`SessionError::Permission`](super::base::SessionError::Permission).
    async fn open(&self) -> SessionResult<Box<dyn MicrophoneStream>>;
}

/// An acquired microphone producing PCM16 mono audio.
#[async_trait]
pub trait MicrophoneStream: Send {
    /// Audio captured over the next `interval`.
    ///
    /// Returns `None` once the stream has ended or was stopped.
    async fn next_chunk(&mut self, interval: Duration) -> Option<Bytes>;

    /// Release the capture device. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// Sink for assistant audio.
pub trait AudioOutput: Send + Sync {
    /// Play a chunk of PCM16 mono audio at the realtime sample rate.
    fn play(&self, chunk: Bytes);

    /// Detach from the session: flush and drop anything still queued.
    fn detach(&self);
}

/// Audio output that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudioOutput;

impl AudioOutput for NullAudioOutput {
    fn play(&self, _chunk: Bytes) {}

    fn detach(&self) {}
}

// =============================================================================
// Peer Connection
// =============================================================================

/// Events raised by a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

/// Channel-based data channel handle.
///
/// Text written to `outbound` is sent on the channel; everything the channel
/// raises arrives on `inbound`.
#[derive(Debug)]
pub struct DataChannel {
    pub label: String,
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<DataChannelEvent>,
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self) -> SessionResult<Box<dyn PeerConnection>>;
}

/// A peer connection carrying one outgoing microphone track, one incoming
/// audio track and a control data channel.
#[async_trait]
pub trait PeerConnection: Send {
    /// Attach the microphone as the outgoing audio track.
    ///
    /// The connection owns the stream from here on and stops it on close.
    async fn add_local_audio(
        &mut self,
        microphone: Box<dyn MicrophoneStream>,
    ) -> SessionResult<()>;

    /// Route the first remote audio track to `sink`.
    async fn attach_remote_audio(&mut self, sink: Arc<dyn AudioOutput>) -> SessionResult<()>;

    async fn create_data_channel(&mut self, label: &str) -> SessionResult<DataChannel>;

    /// Create the local offer and install it as the local description.
    async fn create_offer(&mut self) -> SessionResult<String>;

    /// Install the answer SDP as the remote description.
    async fn apply_answer(&mut self, answer_sdp: &str) -> SessionResult<()>;

    /// Whether the outgoing microphone track is still live.
    fn is_sending_audio(&self) -> bool;

    /// Close the connection and release attached media. Idempotent.
    async fn close(&mut self);
}

/// Everything the host provides to build transports.
#[derive(Clone)]
pub struct HostCapabilities {
    pub audio_input: Arc<dyn AudioInput>,
    pub audio_output: Arc<dyn AudioOutput>,
    /// Required for the peer transport only
    pub peer_connector: Option<Arc<dyn PeerConnector>>,
}

impl HostCapabilities {
    pub fn new(audio_input: Arc<dyn AudioInput>, audio_output: Arc<dyn AudioOutput>) -> Self {
        Self {
            audio_input,
            audio_output,
            peer_connector: None,
        }
    }

    pub fn with_peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_connector = Some(connector);
        self
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("peer_connector", &self.peer_connector.is_some())
            .finish_non_exhaustive()
    }
}
