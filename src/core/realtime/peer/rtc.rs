//! Peer connections backed by the `webrtc` crate.
//!
//! Media is negotiated as PCMU only. Microphone audio is encoded in 20ms
//! frames; the first remote audio track is decoded back to 24kHz PCM16 for the
//! audio output. ICE runs non-trickle: the offer is returned once candidate
//! gathering completes or [`GATHER_TIMEOUT`] passes.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::config::ClientConfig;
use crate::core::audio::g711::{PCMU_SAMPLE_RATE, decode_pcmu, encode_pcmu};
use crate::core::realtime::base::{SessionError, SessionResult};
use crate::core::realtime::devices::{
    AudioOutput, DataChannel, DataChannelEvent, MicrophoneStream, PeerConnection, PeerConnector,
};
use crate::core::realtime::transport::join_or_abort;
use crate::core::realtime::voice::REALTIME_SAMPLE_RATE;

/// Audio captured per outgoing RTP sample.
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Longest wait for ICE candidate gathering before sending the offer.
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer size of the data channel event and outbound queues.
const DATA_CHANNEL_CAPACITY: usize = 256;

/// Static payload type of PCMU.
const PCMU_PAYLOAD_TYPE: u8 = 0;

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_SAMPLE_RATE,
        channels: 1,
        ..Default::default()
    }
}

/// Creates `webrtc` peer connections sharing one configured API instance.
pub struct WebRtcPeerConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcPeerConnector {
    pub fn new(ice_servers: Vec<String>) -> SessionResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: pcmu_capability(),
                    payload_type: PCMU_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| {
                SessionError::InvalidConfiguration(format!("Failed to register PCMU: {e}"))
            })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                SessionError::InvalidConfiguration(format!("Failed to register interceptors: {e}"))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    pub fn from_config(config: &ClientConfig) -> SessionResult<Self> {
        Self::new(config.ice_servers.clone())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for WebRtcPeerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeerConnector")
            .field("ice_servers", &self.ice_servers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PeerConnector for WebRtcPeerConnector {
    async fn create(&self) -> SessionResult<Box<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to create peer connection: {e}")))?;

        Ok(Box::new(WebRtcPeerConnection::new(Arc::new(pc))))
    }
}

/// One `webrtc` peer connection with its media and data channel tasks.
pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    cancel: CancellationToken,
    sending: Arc<AtomicBool>,
    uplink: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl WebRtcPeerConnection {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            pc,
            cancel: CancellationToken::new(),
            sending: Arc::new(AtomicBool::new(false)),
            uplink: None,
            tasks: Vec::new(),
            closed: false,
        }
    }
}

/// Encode microphone audio onto the outgoing track until cancelled.
async fn run_uplink(
    mut microphone: Box<dyn MicrophoneStream>,
    track: Arc<TrackLocalStaticSample>,
    cancel: CancellationToken,
    sending: Arc<AtomicBool>,
) {
    sending.store(true, Ordering::SeqCst);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = microphone.next_chunk(FRAME_DURATION) => chunk,
        };

        match chunk {
            Some(pcm) if pcm.is_empty() => continue,
            Some(pcm) => {
                let frames = (pcm.len() / 2) as u64;
                let sample = Sample {
                    data: encode_pcmu(&pcm),
                    duration: Duration::from_micros(
                        frames * 1_000_000 / REALTIME_SAMPLE_RATE as u64,
                    ),
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Failed to write audio sample: {}", e);
                }
            }
            None => {
                debug!("Microphone stream ended");
                break;
            }
        }
    }

    microphone.stop();
    sending.store(false, Ordering::SeqCst);
}

/// Decode a remote track into `sink` until it ends or the connection closes.
async fn run_downlink(track: Arc<TrackRemote>, sink: Arc<dyn AudioOutput>, cancel: CancellationToken) {
    loop {
        let packet = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            packet = track.read_rtp() => packet,
        };

        match packet {
            Ok((packet, _)) => sink.play(decode_pcmu(&packet.payload)),
            Err(e) => {
                debug!("Remote audio track ended: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_local_audio(
        &mut self,
        mut microphone: Box<dyn MicrophoneStream>,
    ) -> SessionResult<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            "audio".to_owned(),
            "coach-realtime".to_owned(),
        ));

        let sender = match self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                microphone.stop();
                return Err(SessionError::Handshake(format!("Failed to add audio track: {e}")));
            }
        };

        // Interceptors only run while RTCP is read
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    read = sender.read(&mut rtcp_buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        self.uplink = Some(tokio::spawn(run_uplink(
            microphone,
            track,
            self.cancel.clone(),
            self.sending.clone(),
        )));
        Ok(())
    }

    async fn attach_remote_audio(&mut self, sink: Arc<dyn AudioOutput>) -> SessionResult<()> {
        let cancel = self.cancel.clone();
        let attached = Arc::new(AtomicBool::new(false));

        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                let cancel = cancel.clone();
                let first_audio =
                    track.kind() == RTPCodecType::Audio && !attached.swap(true, Ordering::SeqCst);
                Box::pin(async move {
                    if first_audio {
                        info!("Remote audio track attached");
                        tokio::spawn(run_downlink(track, sink, cancel));
                    } else {
                        debug!("Ignoring additional remote track");
                    }
                })
            },
        ));
        Ok(())
    }

    async fn create_data_channel(&mut self, label: &str) -> SessionResult<DataChannel> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to create data channel: {e}")))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(DATA_CHANNEL_CAPACITY);

        let tx = inbound_tx.clone();
        channel.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(DataChannelEvent::Open).await;
            })
        }));

        let tx = inbound_tx.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(DataChannelEvent::Message(text)).await;
                    }
                    Err(_) => debug!("Dropping binary data channel message"),
                }
            })
        }));

        let tx = inbound_tx.clone();
        channel.on_error(Box::new(move |err: webrtc::Error| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(DataChannelEvent::Error(err.to_string())).await;
            })
        }));

        let tx = inbound_tx.clone();
        channel.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(DataChannelEvent::Closed).await;
            })
        }));

        // A failed ICE/DTLS connection never closes the channel on its own
        let tx = inbound_tx;
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let tx = tx.clone();
                Box::pin(async move {
                    debug!("Peer connection state: {}", state);
                    if state == RTCPeerConnectionState::Failed {
                        let _ = tx
                            .send(DataChannelEvent::Error("peer connection failed".to_string()))
                            .await;
                    }
                })
            }));

        let cancel = self.cancel.clone();
        let writer = channel.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    text = outbound_rx.recv() => text,
                };
                let Some(text) = text else { break };
                if let Err(e) = writer.send_text(text).await {
                    warn!("Failed to send on data channel: {}", e);
                }
            }
        }));

        Ok(DataChannel {
            label: label.to_string(),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    async fn create_offer(&mut self) -> SessionResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to create offer: {e}")))?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to set local description: {e}")))?;

        if tokio::time::timeout(GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering incomplete after {:?}, sending offer with the candidates found",
                GATHER_TIMEOUT
            );
        }

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| SessionError::Handshake("No local description after offer".to_string()))
    }

    async fn apply_answer(&mut self, answer_sdp: &str) -> SessionResult<()> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_owned())
            .map_err(|e| SessionError::Handshake(format!("Invalid answer SDP: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to apply answer: {e}")))
    }

    fn is_sending_audio(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();

        if let Some(handle) = self.uplink.take() {
            join_or_abort(handle, "audio uplink").await;
        }
        for handle in self.tasks.drain(..) {
            join_or_abort(handle, "peer connection").await;
        }
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        self.sending.store(false, Ordering::SeqCst);
    }
}
