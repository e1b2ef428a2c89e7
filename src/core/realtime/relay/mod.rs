//! Relay transport: audio and control events over one WebSocket.

mod client;

pub use client::{RelayTransport, RelayTransportSettings, generate_session_id};
