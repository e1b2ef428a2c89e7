//! Session controller: owns the lifecycle state, the active transport and
//! the transcript of one coaching session at a time.
//!
//! All mutating operations serialize on one async lock, and nothing that can
//! stall on the network is awaited while it is held. Handshakes run outside
//! the lock so `stop()` can cancel them; a generation counter makes sure a
//! transport from an earlier session can never touch the current one.
//!
//! Callbacks are queued under the lock and delivered in that order by a
//! single dispatcher task. Operations return once their own callbacks have
//! run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::base::{SessionConfig, SessionError, SessionResult, SessionState, TranscriptEntry};
use super::credential::{CredentialProvider, HttpCredentialProvider, TokenRequest, TokenSessionConfig};
use super::devices::HostCapabilities;
use super::messages::{ClientEvent, SessionSettings};
use super::normalizer::NormalizedEvent;
use super::notifier::{Delivery, Notification, Notifier};
use super::scenario::instructions_for;
use super::transport::{
    BoxedTransport, ControlSender, HostTransportFactory, RealtimeTransport,
    TRANSPORT_EVENT_CAPACITY, TransportEvent, TransportFactory,
};
use crate::config::ClientConfig;

/// Period of the session duration timer.
const DURATION_TICK: Duration = Duration::from_secs(1);

/// Handshake in flight.
struct PendingHandshake {
    cancel: CancellationToken,
    /// Resolves once `start()` has closed the transport it was negotiating
    released: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    generation: u64,
    transport: Option<BoxedTransport>,
    handshake: Option<PendingHandshake>,
    /// Cancels the event pump and duration timer of the connected session
    session_cancel: Option<CancellationToken>,
}

/// Controller for realtime coaching sessions.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    config: Arc<SessionConfig>,
    client: Arc<ClientConfig>,
    credentials: Arc<dyn CredentialProvider>,
    transports: Arc<dyn TransportFactory>,
    notifier: Notifier,
    inner: Arc<Mutex<Inner>>,
    // Lock-free mirrors for the read accessors, written under `inner`
    state: Arc<RwLock<SessionState>>,
    transcript: Arc<RwLock<Vec<TranscriptEntry>>>,
    recording: Arc<AtomicBool>,
    elapsed_secs: Arc<AtomicU64>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        client: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            notifier: Notifier::new(config.clone()),
            config,
            client: Arc::new(client),
            credentials,
            transports,
            inner: Arc::new(Mutex::new(Inner::default())),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            transcript: Arc::new(RwLock::new(Vec::new())),
            recording: Arc::new(AtomicBool::new(false)),
            elapsed_secs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a controller that fetches credentials over HTTP and creates the
    /// configured transport from host capabilities.
    pub fn with_host(
        config: SessionConfig,
        client: ClientConfig,
        host: HostCapabilities,
    ) -> SessionResult<Self> {
        let credentials = Arc::new(HttpCredentialProvider::new(
            client.token_endpoint_url.clone(),
            client.http_timeout(),
        )?);
        let transports = Arc::new(HostTransportFactory::new(Arc::new(client.clone()), host));
        Ok(Self::new(config, client, credentials, transports))
    }

    // =========================================================================
    // Read accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether captured audio is being sent.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Snapshot of the transcript of the current or last session.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().clone()
    }

    /// Time spent connected, in whole seconds.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.elapsed_secs.load(Ordering::SeqCst))
    }

    /// Duration as `MM:SS`.
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Start a session.
    ///
    /// No-op while connecting or connected. Returns the state the call
    /// settled in: `connected`, `error`, or `disconnected` when a concurrent
    /// `stop()` cancelled the handshake. Failures are reported through
    /// `on_error`, never returned.
    pub async fn start(&self) -> SessionState {
        let (generation, cancel, release, connecting) = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_active() {
                debug!("start() ignored while {}", inner.state);
                return inner.state;
            }

            inner.generation += 1;
            let cancel = CancellationToken::new();
            let (release, released) = oneshot::channel::<()>();
            inner.handshake = Some(PendingHandshake {
                cancel: cancel.clone(),
                released,
            });
            self.transcript.write().clear();
            self.elapsed_secs.store(0, Ordering::SeqCst);
            let connecting = self.set_state(&mut inner, SessionState::Connecting);
            (inner.generation, cancel, release, connecting)
        };

        // A stop() issued from a callback cancels before `connecting` is delivered
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = connecting.wait() => {}
        }

        let (settled, delivery) = self.run_handshake(generation, &cancel).await;
        drop(release);
        delivery.wait().await;

        settled
    }

    /// Stop the session.
    ///
    /// While connected, tears the transport down (the microphone is released
    /// before this returns) and returns the final transcript, which is also
    /// delivered through `on_session_end`. While connecting, cancels the
    /// handshake and waits until the pending transport has been closed.
    /// Otherwise does nothing and fires no callback.
    pub async fn stop(&self) -> Option<Vec<TranscriptEntry>> {
        let (transport, handshake, flushed, delivery) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Idle | SessionState::Disconnected | SessionState::Error => {
                    debug!("stop() ignored while {}", inner.state);
                    return None;
                }
                SessionState::Connecting => {
                    let handshake = inner.handshake.take();
                    if let Some(handshake) = &handshake {
                        handshake.cancel.cancel();
                    }
                    let delivery = self.set_state(&mut inner, SessionState::Disconnected);
                    (None, handshake, None, delivery)
                }
                SessionState::Connected => {
                    if let Some(cancel) = inner.session_cancel.take() {
                        cancel.cancel();
                    }
                    self.recording.store(false, Ordering::SeqCst);
                    let _ = self.set_state(&mut inner, SessionState::Disconnected);
                    let entries = self.transcript();
                    let delivery = self
                        .notifier
                        .notify(Notification::SessionEnd(entries.clone()));
                    (inner.transport.take(), None, Some(entries), delivery)
                }
            }
        };

        if let Some(mut transport) = transport {
            transport.close().await;
        }
        if let Some(handshake) = handshake {
            // Resolves when start() drops its sender after closing the transport
            let _ = handshake.released.await;
            info!("Handshake cancelled");
        }
        if let Some(entries) = &flushed {
            info!(
                "Session stopped after {} with {} transcript entries",
                self.formatted_duration(),
                entries.len()
            );
        }
        delivery.wait().await;

        flushed
    }

    /// Cancel the in-flight assistant turn. No-op unless connected.
    pub async fn interrupt(&self) {
        let Some(control) = self.control("interrupt").await else {
            return;
        };
        if let Err(e) = control.send(ClientEvent::ResponseCancel).await {
            warn!("Failed to send response.cancel: {}", e);
        }
    }

    /// Send a typed user message and ask the model to respond.
    pub async fn send_text(&self, text: &str) {
        let Some(control) = self.control("send_text").await else {
            return;
        };
        for event in [ClientEvent::user_text(text), ClientEvent::ResponseCreate] {
            let kind = event.kind();
            if let Err(e) = control.send(event).await {
                warn!("Failed to send {}: {}", kind, e);
                return;
            }
        }
    }

    /// Control sender of the connected transport. The lock is released
    /// before anything is sent, so a stalled send never blocks `stop()`.
    async fn control(&self, operation: &str) -> Option<ControlSender> {
        let inner = self.inner.lock().await;
        if inner.state != SessionState::Connected {
            debug!("{}() ignored while {}", operation, inner.state);
            return None;
        }
        let control = inner.transport.as_ref().and_then(|t| t.control());
        if control.is_none() {
            warn!("{}() found no open control channel", operation);
        }
        control
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Token request for the configured scenario.
    pub fn token_request(&self) -> TokenRequest {
        TokenRequest {
            scenario_id: self.config.scenario_id.clone(),
            cultural_context: self.config.cultural_context.clone(),
            session_config: TokenSessionConfig {
                voice: self.voice().to_string(),
            },
        }
    }

    /// `session.update` payload for the configured scenario.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::new(&self.client.model)
            .with_instructions(instructions_for(
                self.config.scenario_id.as_deref(),
                self.config.cultural_context.as_deref(),
            ))
            .with_transcription_model(&self.client.transcription_model)
            .with_voice(self.voice())
    }

    fn voice(&self) -> &str {
        let voice = self.config.voice_id.trim();
        if voice.is_empty() {
            &self.client.default_voice
        } else {
            voice
        }
    }

    /// Create and negotiate a transport. Every transport created here is
    /// either handed to the session or closed before this returns.
    async fn run_handshake(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> (SessionState, Delivery) {
        if cancel.is_cancelled() {
            return (SessionState::Disconnected, Delivery::none());
        }

        let mut transport = match self.transports.create() {
            Ok(transport) => transport,
            Err(e) => return self.fail_start(generation, None, e).await,
        };
        info!("Starting {} session", transport.kind());

        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.handshake(transport.as_mut(), events_tx) => Some(result),
        };

        match handshake {
            None => {
                transport.close().await;
                (SessionState::Disconnected, Delivery::none())
            }
            Some(Err(e)) => self.fail_start(generation, Some(transport), e).await,
            Some(Ok(())) => self.finish_start(generation, transport, events_rx).await,
        }
    }

    /// Capture first, so a denied microphone fails before any network call.
    async fn handshake(
        &self,
        transport: &mut dyn RealtimeTransport,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<()> {
        transport.prepare().await?;
        let credential = self.credentials.fetch(&self.token_request()).await?;
        debug!("Credential acquired, connecting transport");
        transport
            .connect(credential, self.session_settings(), events)
            .await
    }

    async fn finish_start(
        &self,
        generation: u64,
        mut transport: BoxedTransport,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (SessionState, Delivery) {
        let (session_cancel, delivery) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != SessionState::Connecting {
                drop(inner);
                debug!("Discarding transport of a superseded session");
                transport.close().await;
                return (SessionState::Disconnected, Delivery::none());
            }

            let cancel = CancellationToken::new();
            inner.handshake = None;
            inner.session_cancel = Some(cancel.clone());
            self.recording
                .store(transport.is_recording(), Ordering::SeqCst);
            inner.transport = Some(transport);
            let delivery = self.set_state(&mut inner, SessionState::Connected);
            (cancel, delivery)
        };

        info!("Session connected");
        self.spawn_duration_timer(session_cancel.clone());
        self.spawn_event_pump(generation, session_cancel, events);
        (SessionState::Connected, delivery)
    }

    async fn fail_start(
        &self,
        generation: u64,
        transport: Option<BoxedTransport>,
        err: SessionError,
    ) -> (SessionState, Delivery) {
        if let Some(mut transport) = transport {
            transport.close().await;
        }

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != SessionState::Connecting {
            debug!("Ignoring failure of a cancelled handshake: {}", err);
            return (SessionState::Disconnected, Delivery::none());
        }
        inner.handshake = None;
        error!("Session failed to start: {}", err);
        let _ = self.set_state(&mut inner, SessionState::Error);
        (SessionState::Error, self.notifier.notify(Notification::Error(err)))
    }

    // =========================================================================
    // Connected session
    // =========================================================================

    fn spawn_event_pump(
        &self,
        generation: u64,
        cancel: CancellationToken,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Some(event) => this.handle_transport_event(generation, event).await,
                    None => {
                        this.handle_transport_event(
                            generation,
                            TransportEvent::Closed {
                                reason: Some("transport stopped".to_string()),
                            },
                        )
                        .await;
                        break;
                    }
                }
            }
        });
    }

    fn spawn_duration_timer(&self, cancel: CancellationToken) {
        let elapsed_secs = self.elapsed_secs.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(DURATION_TICK);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        elapsed_secs.store(started.elapsed().as_secs(), Ordering::SeqCst);
                    }
                }
            }
        });
    }

    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Inbound(NormalizedEvent::Transcript(entry)) => {
                let delivery = {
                    let inner = self.inner.lock().await;
                    if !Self::is_current(&inner, generation) {
                        trace!("Dropping transcript from a stale session");
                        return;
                    }
                    debug!("{}: {}", entry.speaker, entry.text);
                    self.transcript.write().push(entry.clone());
                    self.notifier.notify(Notification::Transcript(entry))
                };
                delivery.wait().await;
            }
            TransportEvent::Inbound(NormalizedEvent::ProtocolError { message }) => {
                self.fail_session(generation, SessionError::Transport(message))
                    .await;
            }
            TransportEvent::Inbound(NormalizedEvent::SessionCreated { session_id }) => {
                info!(
                    "Realtime session created: {}",
                    session_id.as_deref().unwrap_or("unknown")
                );
            }
            TransportEvent::Inbound(NormalizedEvent::ResponseDone { response_id }) => {
                debug!(
                    "Response done: {}",
                    response_id.as_deref().unwrap_or("unknown")
                );
            }
            TransportEvent::Inbound(NormalizedEvent::AudioDelta(_) | NormalizedEvent::Ignored) => {}
            TransportEvent::Failed(err) => self.fail_session(generation, err).await,
            TransportEvent::Closed { reason } => {
                let message = reason.unwrap_or_else(|| "connection closed".to_string());
                self.fail_session(generation, SessionError::Transport(message))
                    .await;
            }
        }
    }

    /// Tear down a connected session after a fatal transport error.
    async fn fail_session(&self, generation: u64, err: SessionError) {
        let (transport, delivery) = {
            let mut inner = self.inner.lock().await;
            if !Self::is_current(&inner, generation) {
                debug!("Ignoring transport error after teardown: {}", err);
                return;
            }
            if let Some(cancel) = inner.session_cancel.take() {
                cancel.cancel();
            }
            self.recording.store(false, Ordering::SeqCst);
            error!("Session failed: {}", err);
            let _ = self.set_state(&mut inner, SessionState::Error);
            let delivery = self.notifier.notify(Notification::Error(err));
            (inner.transport.take(), delivery)
        };

        if let Some(mut transport) = transport {
            transport.close().await;
        }
        delivery.wait().await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn is_current(inner: &Inner, generation: u64) -> bool {
        inner.generation == generation && inner.state == SessionState::Connected
    }

    /// Sole writer of the session state. Queues `on_state_change`.
    fn set_state(&self, inner: &mut Inner, next: SessionState) -> Delivery {
        if !inner.state.can_transition_to(next) {
            warn!("Unexpected state transition {} -> {}", inner.state, next);
        }
        debug!("Session state {} -> {}", inner.state, next);
        inner.state = next;
        *self.state.write() = next;
        self.notifier.notify(Notification::State(next))
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("transport", &self.client.transport)
            .field("recording", &self.is_recording())
            .field("transcript_len", &self.transcript.read().len())
            .finish()
    }
}

/// Format a duration as `MM:SS`. Minutes keep counting past an hour.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
