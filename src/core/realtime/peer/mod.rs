//! Peer transport: offer/answer signaling and a control data channel.

mod client;
mod rtc;
mod signaling;

pub use client::{CONTROL_CHANNEL_LABEL, PeerTransport, PeerTransportSettings};
pub use rtc::{GATHER_TIMEOUT, WebRtcPeerConnection, WebRtcPeerConnector};
pub use signaling::SignalingClient;
