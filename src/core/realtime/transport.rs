//! Transport abstraction shared by the peer and relay strategies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::base::{SessionError, SessionResult};
use super::credential::Credential;
use super::devices::HostCapabilities;
use super::messages::{ClientEvent, SessionSettings};
use super::normalizer::NormalizedEvent;
use super::peer::{PeerTransport, PeerTransportSettings};
use super::relay::{RelayTransport, RelayTransportSettings};
use crate::config::ClientConfig;

/// Capacity of the channel carrying transport events to the controller.
pub const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// How long `close` waits for background tasks before aborting them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Available transport strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Direct media path negotiated with an offer/answer exchange
    Peer,
    /// Duplex WebSocket through the relay server
    #[default]
    Relay,
}

impl TransportKind {
    /// Parse transport kind from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "peer" | "webrtc" => Some(TransportKind::Peer),
            "relay" | "websocket" | "ws" => Some(TransportKind::Relay),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Peer => write!(f, "peer"),
            TransportKind::Relay => write!(f, "relay"),
        }
    }
}

/// What a connected transport reports to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A normalized inbound message
    Inbound(NormalizedEvent),
    /// The control channel reported an error
    Failed(SessionError),
    /// The connection closed
    Closed { reason: Option<String> },
}

/// Cloneable handle for queueing control events on a connected transport.
///
/// A send waits for room in the outbound queue but gives up with
/// [`SessionError::NotConnected`] as soon as the transport closes, so holders
/// never outlive the connection.
#[derive(Debug, Clone)]
pub struct ControlSender {
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ControlSender {
    /// `closed` must be cancelled when the transport closes.
    pub fn new(outbound: mpsc::Sender<String>, closed: CancellationToken) -> Self {
        Self { outbound, closed }
    }

    pub async fn send(&self, event: ClientEvent) -> SessionResult<()> {
        let kind = event.kind();
        let json = event.to_json()?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(SessionError::NotConnected),
            sent = self.outbound.send(json) => sent.map_err(|_| {
                SessionError::Transport(format!("connection closed before {kind} was sent"))
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }
}

/// A realtime transport strategy.
///
/// Lifecycle: `prepare` (local capture only, no network), `connect`
/// (handshake using the credential), control events through the
/// [`ControlSender`] from `control`, then `close`.
/// A failed `connect` leaves nothing running, but `close` must still be
/// called to release the capture device.
#[async_trait]
pub trait RealtimeTransport: Send {
    fn kind(&self) -> TransportKind;

    /// Acquire the microphone.
    async fn prepare(&mut self) -> SessionResult<()>;

    /// Perform the handshake and send `session.update` once the control
    /// channel is open. Inbound traffic is delivered on `events`.
    async fn connect(
        &mut self,
        credential: Credential,
        settings: SessionSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> SessionResult<()>;

    /// Handle for sending control events, once connected.
    fn control(&self) -> Option<ControlSender>;

    /// Tear down the connection and release the microphone. Idempotent.
    ///
    /// Pending sends on any [`ControlSender`] fail once this starts.
    async fn close(&mut self);

    /// Whether captured audio is currently being sent.
    fn is_recording(&self) -> bool;
}

/// Boxed transport owned by the controller.
pub type BoxedTransport = Box<dyn RealtimeTransport>;

/// Creates a fresh transport for each session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> SessionResult<BoxedTransport>;
}

/// Builds the configured transport from host capabilities.
#[derive(Debug, Clone)]
pub struct HostTransportFactory {
    config: Arc<ClientConfig>,
    host: HostCapabilities,
}

impl HostTransportFactory {
    pub fn new(config: Arc<ClientConfig>, host: HostCapabilities) -> Self {
        Self { config, host }
    }
}

impl TransportFactory for HostTransportFactory {
    fn create(&self) -> SessionResult<BoxedTransport> {
        match self.config.transport {
            TransportKind::Peer => {
                let connector = self.host.peer_connector.clone().ok_or_else(|| {
                    SessionError::InvalidConfiguration(
                        "peer transport requires a peer connector".to_string(),
                    )
                })?;
                Ok(Box::new(PeerTransport::new(
                    PeerTransportSettings::from_config(&self.config),
                    self.host.audio_input.clone(),
                    self.host.audio_output.clone(),
                    connector,
                )))
            }
            TransportKind::Relay => Ok(Box::new(RelayTransport::new(
                RelayTransportSettings::from_config(&self.config),
                self.host.audio_input.clone(),
                self.host.audio_output.clone(),
            ))),
        }
    }
}

/// Deliver an event to the controller unless the transport is shutting down.
///
/// Returns `false` when the event could not be delivered.
pub(crate) async fn forward_event(
    events: &mpsc::Sender<TransportEvent>,
    cancel: &CancellationToken,
    event: TransportEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

/// Wait for a transport task to finish, aborting it after [`SHUTDOWN_TIMEOUT`].
pub(crate) async fn join_or_abort(handle: JoinHandle<()>, task: &str) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
        warn!("{} task did not stop within {:?}, aborting", task, SHUTDOWN_TIMEOUT);
        abort.abort();
    }
}
