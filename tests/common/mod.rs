//! Test doubles for host devices, credentials and transports.
//!
//! Each integration test binary compiles this module on its own, so not every
//! helper is used everywhere.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use coach_realtime::core::realtime::transport::TransportEvent;
use coach_realtime::core::realtime::{
    AudioInput, AudioOutput, BoxedTransport, ControlSender, Credential, CredentialProvider,
    DataChannel, DataChannelEvent, MicrophoneStream, PeerConnection, PeerConnector,
    RealtimeTransport, SessionConfig, SessionEndCallback, SessionError, SessionErrorCallback,
    SessionResult, SessionSettings, SessionState, StateChangeCallback, TokenRequest,
    TranscriptCallback, TranscriptEntry, TransportFactory, TransportKind,
};

/// Poll `condition` every 10ms until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Callback recorder
// =============================================================================

/// Records everything a controller reports through its callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    pub states: Arc<Mutex<Vec<SessionState>>>,
    pub errors: Arc<Mutex<Vec<SessionError>>>,
    pub transcripts: Arc<Mutex<Vec<TranscriptEntry>>>,
    pub session_ends: Arc<Mutex<Vec<Vec<TranscriptEntry>>>>,
}

impl Recorder {
    /// Session config with every callback wired to this recorder.
    pub fn session_config(&self, voice: &str) -> SessionConfig {
        let states = self.states.clone();
        let on_state: StateChangeCallback = Arc::new(move |state: SessionState| {
            let states = states.clone();
            Box::pin(async move {
                states.lock().push(state);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let errors = self.errors.clone();
        let on_error: SessionErrorCallback = Arc::new(move |error: SessionError| {
            let errors = errors.clone();
            Box::pin(async move {
                errors.lock().push(error);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let transcripts = self.transcripts.clone();
        let on_transcript: TranscriptCallback = Arc::new(move |entry: TranscriptEntry| {
            let transcripts = transcripts.clone();
            Box::pin(async move {
                transcripts.lock().push(entry);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let session_ends = self.session_ends.clone();
        let on_end: SessionEndCallback = Arc::new(move |entries: Vec<TranscriptEntry>| {
            let session_ends = session_ends.clone();
            Box::pin(async move {
                session_ends.lock().push(entries);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        SessionConfig::new(voice)
            .on_state_change(on_state)
            .on_error(on_error)
            .on_transcript_event(on_transcript)
            .on_session_end(on_end)
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().clone()
    }

    pub fn transcript_texts(&self) -> Vec<String> {
        self.transcripts.lock().iter().map(|e| e.text.clone()).collect()
    }
}

// =============================================================================
// Audio
// =============================================================================

/// Microphone producing a constant chunk of silence per interval.
pub struct MockMicrophone {
    live: Arc<AtomicBool>,
    chunk: Bytes,
}

#[async_trait]
impl MicrophoneStream for MockMicrophone {
    async fn next_chunk(&mut self, interval: Duration) -> Option<Bytes> {
        tokio::time::sleep(interval).await;
        if self.live.load(Ordering::SeqCst) {
            Some(self.chunk.clone())
        } else {
            None
        }
    }

    fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Audio input that hands out [`MockMicrophone`]s and tracks their release.
#[derive(Default)]
pub struct MockAudioInput {
    deny: bool,
    opened: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockAudioInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input whose permission prompt is always declined.
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Default::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Whether every microphone handed out so far has been stopped.
    pub fn all_released(&self) -> bool {
        self.opened
            .lock()
            .iter()
            .all(|live| !live.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl AudioInput for MockAudioInput {
    async fn open(&self) -> SessionResult<Box<dyn MicrophoneStream>> {
        if self.deny {
            return Err(SessionError::Permission(
                "Microphone access denied".to_string(),
            ));
        }

        let live = Arc::new(AtomicBool::new(true));
        self.opened.lock().push(live.clone());
        Ok(Box::new(MockMicrophone {
            live,
            chunk: Bytes::from(vec![0u8; 960]),
        }))
    }
}

/// Audio output that keeps every played chunk.
#[derive(Default)]
pub struct RecordingAudioOutput {
    pub played: Mutex<Vec<Bytes>>,
    pub detached: AtomicUsize,
}

impl AudioOutput for RecordingAudioOutput {
    fn play(&self, chunk: Bytes) {
        self.played.lock().push(chunk);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Credential provider with scripted failures and latency.
#[derive(Default)]
pub struct MockCredentialProvider {
    pub fail: bool,
    pub delay: Duration,
    pub requests: Mutex<Vec<TokenRequest>>,
}

impl MockCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn fetch(&self, request: &TokenRequest) -> SessionResult<Credential> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SessionError::Credential(
                "Token request failed (500 Internal Server Error)".to_string(),
            ));
        }
        Ok(Credential::new("ek_mock", None))
    }
}

// =============================================================================
// Transports
// =============================================================================

/// Shared script and observations for [`MockTransport`]s.
#[derive(Default)]
pub struct MockTransportState {
    /// Delay inside `connect`
    pub connect_delay: Mutex<Duration>,
    /// Error returned by the next `connect`
    pub connect_error: Mutex<Option<SessionError>>,
    /// Control channel that never drains, so every send blocks
    pub stall_control: AtomicBool,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    /// Control messages as sent, in JSON
    pub sent: Mutex<Vec<String>>,
    pub settings: Mutex<Option<SessionSettings>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    control: Mutex<Option<mpsc::Receiver<String>>>,
}

impl MockTransportState {
    /// Deliver an event as if it came from the remote side.
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self.events.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Control messages sent so far.
    pub fn sent(&self) -> Vec<String> {
        let mut sent = self.sent.lock();
        if !self.stall_control.load(Ordering::SeqCst)
            && let Some(rx) = self.control.lock().as_mut()
        {
            while let Ok(json) = rx.try_recv() {
                sent.push(json);
            }
        }
        sent.clone()
    }

    /// `type` of each control message sent so far.
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|json| serde_json::from_str::<serde_json::Value>(json).ok())
            .filter_map(|value| value["type"].as_str().map(str::to_string))
            .collect()
    }
}

/// In-memory transport driven by a [`MockTransportState`].
pub struct MockTransport {
    state: Arc<MockTransportState>,
    input: Arc<MockAudioInput>,
    microphone: Option<Box<dyn MicrophoneStream>>,
    control: Option<ControlSender>,
    closed: CancellationToken,
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    async fn prepare(&mut self) -> SessionResult<()> {
        self.microphone = Some(self.input.open().await?);
        Ok(())
    }

    async fn connect(
        &mut self,
        _credential: Credential,
        settings: SessionSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.state.connect_error.lock().take() {
            return Err(err);
        }

        let (tx, rx) = if self.state.stall_control.load(Ordering::SeqCst) {
            // Fill the only slot so the next send waits forever
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(String::new());
            (tx, rx)
        } else {
            mpsc::channel(64)
        };

        *self.state.settings.lock() = Some(settings);
        *self.state.events.lock() = Some(events);
        *self.state.control.lock() = Some(rx);
        self.control = Some(ControlSender::new(tx, self.closed.clone()));
        Ok(())
    }

    fn control(&self) -> Option<ControlSender> {
        self.control.clone()
    }

    async fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
        self.closed.cancel();
        self.control = None;
    }

    fn is_recording(&self) -> bool {
        self.control.is_some()
            && self
                .microphone
                .as_ref()
                .is_some_and(|microphone| microphone.is_live())
    }
}

/// Factory producing [`MockTransport`]s that share one state.
pub struct MockTransportFactory {
    pub state: Arc<MockTransportState>,
    pub input: Arc<MockAudioInput>,
    pub created: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new(input: Arc<MockAudioInput>) -> Self {
        Self {
            state: Arc::new(MockTransportState::default()),
            input,
            created: AtomicUsize::new(0),
        }
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> SessionResult<BoxedTransport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            state: self.state.clone(),
            input: self.input.clone(),
            microphone: None,
            control: None,
            closed: CancellationToken::new(),
        }))
    }
}

// =============================================================================
// Peer connection
// =============================================================================

/// The remote side of a [`MockPeerConnection`].
#[derive(Default)]
pub struct MockPeerHandle {
    /// Events delivered to the local data channel
    pub to_client: Mutex<Option<mpsc::Sender<DataChannelEvent>>>,
    /// Messages the local side sent on the data channel
    pub from_client: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    pub channel_label: Mutex<Option<String>>,
    pub answer: Mutex<Option<String>>,
    pub closed: AtomicBool,
    pub remote_audio_attached: AtomicBool,
    microphone_live: Mutex<Option<Arc<AtomicBool>>>,
}

impl MockPeerHandle {
    /// Push an event to the local data channel.
    pub async fn emit(&self, event: DataChannelEvent) {
        let sender = self.to_client.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Next message the local side sent, waiting up to two seconds.
    pub async fn next_sent(&self) -> Option<String> {
        let mut guard = self.from_client.lock().await;
        let receiver = guard.as_mut()?;
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockPeerConnection {
    handle: Arc<MockPeerHandle>,
    open_on_answer: bool,
    microphone: Option<Box<dyn MicrophoneStream>>,
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_local_audio(
        &mut self,
        microphone: Box<dyn MicrophoneStream>,
    ) -> SessionResult<()> {
        self.microphone = Some(microphone);
        Ok(())
    }

    async fn attach_remote_audio(&mut self, _sink: Arc<dyn AudioOutput>) -> SessionResult<()> {
        self.handle
            .remote_audio_attached
            .store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(&mut self, label: &str) -> SessionResult<DataChannel> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        *self.handle.to_client.lock() = Some(inbound_tx);
        *self.handle.channel_label.lock() = Some(label.to_string());
        if let Ok(mut from_client) = self.handle.from_client.try_lock() {
            *from_client = Some(outbound_rx);
        }

        Ok(DataChannel {
            label: label.to_string(),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    async fn create_offer(&mut self) -> SessionResult<String> {
        Ok("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock-offer\r\n".to_string())
    }

    async fn apply_answer(&mut self, answer_sdp: &str) -> SessionResult<()> {
        *self.handle.answer.lock() = Some(answer_sdp.to_string());
        if self.open_on_answer {
            self.handle.emit(DataChannelEvent::Open).await;
        }
        Ok(())
    }

    fn is_sending_audio(&self) -> bool {
        self.microphone
            .as_ref()
            .is_some_and(|microphone| microphone.is_live())
    }

    async fn close(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
        self.handle.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector creating [`MockPeerConnection`]s and keeping their handles.
pub struct MockPeerConnector {
    pub open_on_answer: bool,
    pub peers: Mutex<Vec<Arc<MockPeerHandle>>>,
}

impl MockPeerConnector {
    pub fn new() -> Self {
        Self {
            open_on_answer: true,
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose data channels never open.
    pub fn silent() -> Self {
        Self {
            open_on_answer: false,
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn last_peer(&self) -> Option<Arc<MockPeerHandle>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerConnector for MockPeerConnector {
    async fn create(&self) -> SessionResult<Box<dyn PeerConnection>> {
        let handle = Arc::new(MockPeerHandle::default());
        self.peers.lock().push(handle.clone());
        Ok(Box::new(MockPeerConnection {
            handle,
            open_on_answer: self.open_on_answer,
            microphone: None,
        }))
    }
}
