//! Peer transport: direct media path plus the `oai-events` data channel.
//!
//! The microphone becomes the outgoing audio track and the first remote track
//! is routed to the audio output. Control events travel over the data
//! channel, which must open within `control_channel_timeout` after the
//! answer is applied.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::signaling::SignalingClient;
use crate::config::ClientConfig;
use crate::core::realtime::base::{SessionError, SessionResult};
use crate::core::realtime::credential::Credential;
use crate::core::realtime::devices::{
    AudioInput, AudioOutput, DataChannel, DataChannelEvent, MicrophoneStream, PeerConnection,
    PeerConnector,
};
use crate::core::realtime::messages::{ClientEvent, SessionSettings};
use crate::core::realtime::normalizer::{NormalizedEvent, normalize};
use crate::core::realtime::transport::{
    ControlSender, RealtimeTransport, TransportEvent, TransportKind, forward_event, join_or_abort,
};

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Tunables for the peer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTransportSettings {
    pub signaling_url: String,
    pub model: String,
    pub http_timeout: Duration,
    pub control_channel_timeout: Duration,
}

impl PeerTransportSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            signaling_url: config.signaling_url.clone(),
            model: config.model.clone(),
            http_timeout: config.http_timeout(),
            control_channel_timeout: config.control_channel_timeout(),
        }
    }
}

/// Peer transport over a host-provided peer connection.
pub struct PeerTransport {
    settings: PeerTransportSettings,
    audio_input: Arc<dyn AudioInput>,
    audio_output: Arc<dyn AudioOutput>,
    connector: Arc<dyn PeerConnector>,
    /// Held between `prepare` and `connect`
    microphone: Option<Box<dyn MicrophoneStream>>,
    peer: Option<Box<dyn PeerConnection>>,
    control: Option<ControlSender>,
    cancel: CancellationToken,
    reader_handle: Option<JoinHandle<()>>,
}

impl PeerTransport {
    pub fn new(
        settings: PeerTransportSettings,
        audio_input: Arc<dyn AudioInput>,
        audio_output: Arc<dyn AudioOutput>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            settings,
            audio_input,
            audio_output,
            connector,
            microphone: None,
            peer: None,
            control: None,
            cancel: CancellationToken::new(),
            reader_handle: None,
        }
    }

    fn spawn_reader(
        &mut self,
        mut inbound: mpsc::Receiver<DataChannelEvent>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        let cancel = self.cancel.clone();

        self.reader_handle = Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = inbound.recv() => event,
                };

                match event {
                    Some(DataChannelEvent::Message(text)) => match normalize(&text) {
                        // Assistant audio arrives on the remote media track
                        NormalizedEvent::Ignored | NormalizedEvent::AudioDelta(_) => {}
                        event => {
                            if !forward_event(&events, &cancel, TransportEvent::Inbound(event)).await {
                                break;
                            }
                        }
                    },
                    Some(DataChannelEvent::Error(e)) => {
                        warn!("Data channel error: {}", e);
                        let err = SessionError::Transport(format!("data channel error: {e}"));
                        if !forward_event(&events, &cancel, TransportEvent::Failed(err)).await {
                            break;
                        }
                    }
                    Some(DataChannelEvent::Open) => {}
                    Some(DataChannelEvent::Closed) | None => {
                        info!("Data channel closed");
                        forward_event(&events, &cancel, TransportEvent::Closed { reason: None })
                            .await;
                        break;
                    }
                }
            }
        }));
    }
}

/// Wire media, create the control channel and run the offer/answer exchange.
async fn negotiate(
    peer: &mut dyn PeerConnection,
    microphone: Box<dyn MicrophoneStream>,
    audio_output: Arc<dyn AudioOutput>,
    settings: &PeerTransportSettings,
    credential: Credential,
) -> SessionResult<DataChannel> {
    peer.add_local_audio(microphone).await?;
    peer.attach_remote_audio(audio_output).await?;
    let channel = peer.create_data_channel(CONTROL_CHANNEL_LABEL).await?;

    let offer = peer.create_offer().await?;
    let signaling = SignalingClient::new(
        &settings.signaling_url,
        &settings.model,
        settings.http_timeout,
    )?;
    let answer = signaling.exchange(&offer, &credential).await?;
    drop(credential);

    peer.apply_answer(&answer).await?;
    Ok(channel)
}

/// Wait until the data channel reports `Open`.
async fn wait_for_open(inbound: &mut mpsc::Receiver<DataChannelEvent>) -> SessionResult<()> {
    loop {
        match inbound.recv().await {
            Some(DataChannelEvent::Open) => return Ok(()),
            Some(DataChannelEvent::Message(_)) => {
                debug!("Dropping data channel message received before open");
            }
            Some(DataChannelEvent::Error(e)) => {
                return Err(SessionError::Handshake(format!("control channel error: {e}")));
            }
            Some(DataChannelEvent::Closed) | None => {
                return Err(SessionError::Handshake(
                    "control channel closed before opening".to_string(),
                ));
            }
        }
    }
}

#[async_trait]
impl RealtimeTransport for PeerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Peer
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

        let microphone = match self.microphone.take() {
            Some(microphone) => microphone,
            None => self.audio_input.open().await?,
        };

        let mut peer = match self.connector.create().await {
            Ok(peer) => peer,
            Err(e) => {
                self.microphone = Some(microphone);
                return Err(e);
            }
        };
        let negotiated = negotiate(
            peer.as_mut(),
            microphone,
            self.audio_output.clone(),
            &self.settings,
            credential,
        )
        .await;
        self.peer = Some(peer);
        let mut channel = negotiated?;

        let timeout = self.settings.control_channel_timeout;
        match tokio::time::timeout(timeout, wait_for_open(&mut channel.inbound)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SessionError::Handshake(format!(
                    "control channel did not open within {timeout:?}"
                )));
            }
        }

        info!("Control channel {} open", channel.label);

        let update = ClientEvent::SessionUpdate { session: settings }.to_json()?;
        channel
            .outbound
            .send(update)
            .await
            .map_err(|_| SessionError::Handshake("control channel closed".to_string()))?;

        self.spawn_reader(channel.inbound, events);
        self.control = Some(ControlSender::new(channel.outbound, self.cancel.clone()));
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
        if let Some(handle) = self.reader_handle.take() {
            join_or_abort(handle, "data channel reader").await;
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close().await;
        }

        self.audio_output.detach();
    }

    fn is_recording(&self) -> bool {
        self.control.is_some()
            && self
                .peer
                .as_ref()
                .is_some_and(|peer| peer.is_sending_audio())
    }
}
