//! WebSocket relay transport.
//!
//! Opens `<relay_base_url>/<session_id>`, sends `session.update` as the first
//! frame and then uploads one base64 audio chunk per `chunk_interval`.
//! Inbound text frames go through the normalizer; assistant audio is played
//! on the host audio output.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::core::realtime::base::{SessionError, SessionResult};
use crate::core::realtime::credential::Credential;
use crate::core::realtime::devices::{AudioInput, AudioOutput, MicrophoneStream};
use crate::core::realtime::messages::{ClientEvent, SessionSettings};
use crate::core::realtime::normalizer::{NormalizedEvent, normalize};
use crate::core::realtime::transport::{
    ControlSender, RealtimeTransport, TransportEvent, TransportKind, forward_event, join_or_abort,
};

/// Channel capacity for outgoing WebSocket messages.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Tunables for the relay transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTransportSettings {
    pub base_url: String,
    pub chunk_interval: Duration,
    pub connect_timeout: Duration,
}

impl RelayTransportSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_url: config.relay_base_url.clone(),
            chunk_interval: config.chunk_interval(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Relay URL for one session.
    pub fn session_url(&self, session_id: &str) -> SessionResult<Url> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), session_id);
        Url::parse(&raw)
            .map_err(|e| SessionError::InvalidConfiguration(format!("invalid relay URL {raw}: {e}")))
    }
}

/// Generate a relay session identifier.
pub fn generate_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// Relay transport over a duplex WebSocket.
pub struct RelayTransport {
    settings: RelayTransportSettings,
    audio_input: Arc<dyn AudioInput>,
    audio_output: Arc<dyn AudioOutput>,
    /// Held between `prepare` and `connect`
    microphone: Option<Box<dyn MicrophoneStream>>,
    session_id: Option<String>,
    control: Option<ControlSender>,
    cancel: CancellationToken,
    recording: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
    capture_handle: Option<JoinHandle<()>>,
}

impl RelayTransport {
    pub fn new(
        settings: RelayTransportSettings,
        audio_input: Arc<dyn AudioInput>,
        audio_output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            settings,
            audio_input,
            audio_output,
            microphone: None,
            session_id: None,
            control: None,
            cancel: CancellationToken::new(),
            recording: Arc::new(AtomicBool::new(false)),
            connection_handle: None,
            capture_handle: None,
        }
    }

    /// Session identifier used in the relay URL, once connected.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn spawn_capture(&mut self, mut microphone: Box<dyn MicrophoneStream>, control: ControlSender) {
        let cancel = self.cancel.clone();
        let recording = self.recording.clone();
        let interval = self.settings.chunk_interval;

        recording.store(true, Ordering::SeqCst);
        self.capture_handle = Some(tokio::spawn(async move {
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    chunk = microphone.next_chunk(interval) => chunk,
                };

                match chunk {
                    Some(data) if data.is_empty() => continue,
                    Some(data) => {
                        if control.send(ClientEvent::audio_append(&data)).await.is_err() {
                            debug!("Relay connection gone, stopping audio capture");
                            break;
                        }
                    }
                    None => {
                        debug!("Microphone stream ended");
                        break;
                    }
                }
            }

            microphone.stop();
            recording.store(false, Ordering::SeqCst);
        }));
    }
}

#[async_trait]
impl RealtimeTransport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    async fn prepare(&mut self) -> SessionResult<()> {
        if self.microphone.is_none() {
            self.microphone = Some(self.audio_input.open().await?);
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        credential: Credential,
        settings: SessionSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<()> {
        if self.control.is_some() {
            return Ok(());
        }

        let session_id = generate_session_id();
        let url = self.settings.session_url(&session_id)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let auth = http::HeaderValue::from_str(&credential.bearer()).map_err(|_| {
            SessionError::Credential("credential is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(http::header::AUTHORIZATION, auth);
        drop(credential);

        let connect = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) =
            match tokio::time::timeout(self.settings.connect_timeout, connect).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
                Err(_) => {
                    return Err(SessionError::Handshake(format!(
                        "relay connection timed out after {:?}",
                        self.settings.connect_timeout
                    )));
                }
            };

        info!("Connected to realtime relay as {}", session_id);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let update = ClientEvent::SessionUpdate { session: settings }.to_json()?;
        ws_sink
            .send(Message::Text(update.into()))
            .await
            .map_err(|e| SessionError::Handshake(format!("failed to send session.update: {e}")))?;

        let (tx, mut rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);
        let cancel = self.cancel.clone();
        let audio_output = self.audio_output.clone();
        let recording = self.recording.clone();

        self.connection_handle = Some(tokio::spawn(async move {
            let mut closed_reason: Option<Option<String>> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            debug!("Failed to send close frame: {}", e);
                        }
                        break;
                    }

                    // Handle outgoing messages
                    Some(json) = rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            closed_reason = Some(Some(e.to_string()));
                            break;
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match normalize(&text) {
                                NormalizedEvent::AudioDelta(audio) => audio_output.play(audio),
                                NormalizedEvent::Ignored => {}
                                event => {
                                    if !forward_event(&events, &cancel, TransportEvent::Inbound(event)).await {
                                        break;
                                    }
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Relay closed the connection");
                                closed_reason = Some(
                                    frame
                                        .map(|f| f.reason.to_string())
                                        .filter(|reason| !reason.is_empty()),
                                );
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                closed_reason = Some(Some(e.to_string()));
                                break;
                            }
                            None => {
                                closed_reason = Some(None);
                                break;
                            }
                        }
                    }
                }
            }

            recording.store(false, Ordering::SeqCst);
            if let Some(reason) = closed_reason {
                forward_event(&events, &cancel, TransportEvent::Closed { reason }).await;
            }
        }));

        let control = ControlSender::new(tx, self.cancel.clone());
        self.session_id = Some(session_id);
        self.control = Some(control.clone());

        match self.microphone.take() {
            Some(microphone) => self.spawn_capture(microphone, control),
            None => warn!("Relay connected without a prepared microphone"),
        }

        Ok(())
    }

    fn control(&self) -> Option<ControlSender> {
        self.control.clone()
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        self.control = None;

        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
        if let Some(handle) = self.capture_handle.take() {
            join_or_abort(handle, "audio capture").await;
        }
        if let Some(handle) = self.connection_handle.take() {
            join_or_abort(handle, "relay connection").await;
        }

        self.recording.store(false, Ordering::SeqCst);
        self.audio_output.detach();
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}
