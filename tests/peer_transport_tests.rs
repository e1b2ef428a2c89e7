//! Integration tests for the peer transport
//!
//! Token and signaling endpoints are served by wiremock; the peer connection
//! is an in-memory double exposing the remote end of the data channel.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::{Value, json};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use coach_realtime::config::ClientConfig;
use coach_realtime::core::realtime::{
    CONTROL_CHANNEL_LABEL, DataChannelEvent, HostCapabilities, NullAudioOutput, SessionController,
    SessionError, SessionState, Speaker, TransportKind,
};

use common::{MockAudioInput, MockPeerConnector, Recorder, wait_until};

const ANSWER: &str = "v=0\r\no=- 9 9 IN IP4 203.0.113.7\r\ns=answer\r\n";

async fn endpoints(signaling_status: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "ek_peer",
            "expires_at": 1_700_000_060
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .and(query_param("model", "gpt-realtime"))
        .and(header("authorization", "Bearer ek_peer"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(
            "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock-offer\r\n",
        ))
        .respond_with(ResponseTemplate::new(signaling_status).set_body_string(
            if signaling_status < 300 {
                ANSWER
            } else {
                "{\"error\":\"invalid offer\"}"
            },
        ))
        .mount(&server)
        .await;

    server
}

fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        token_endpoint_url: format!("{}/api/token", server.uri()),
        signaling_url: format!("{}/v1/realtime/calls", server.uri()),
        transport: TransportKind::Peer,
        control_channel_timeout_ms: 300,
        ..Default::default()
    }
}

struct Session {
    controller: SessionController,
    recorder: Recorder,
    input: Arc<MockAudioInput>,
    connector: Arc<MockPeerConnector>,
}

fn session(config: ClientConfig, input: MockAudioInput, connector: MockPeerConnector) -> Session {
    let recorder = Recorder::default();
    let input = Arc::new(input);
    let connector = Arc::new(connector);
    let host = HostCapabilities::new(input.clone(), Arc::new(NullAudioOutput))
        .with_peer_connector(connector.clone());
    let controller = SessionController::with_host(
        recorder
            .session_config("coral")
            .with_scenario("team-standup")
            .with_cultural_context("Japanese workplace"),
        config,
        host,
    )
    .unwrap();

    Session {
        controller,
        recorder,
        input,
        connector,
    }
}

fn message(value: Value) -> DataChannelEvent {
    DataChannelEvent::Message(value.to_string())
}

#[tokio::test]
async fn test_peer_session_end_to_end() {
    let server = endpoints(201).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::new(),
    );

    assert_eq!(s.controller.start().await, SessionState::Connected);
    assert!(s.controller.is_recording());

    let peer = s.connector.last_peer().unwrap();
    assert_eq!(peer.answer.lock().as_deref(), Some(ANSWER));
    assert_eq!(
        peer.channel_label.lock().as_deref(),
        Some(CONTROL_CHANNEL_LABEL)
    );
    assert!(peer.remote_audio_attached.load(Ordering::SeqCst));

    let update: Value = serde_json::from_str(&peer.next_sent().await.unwrap()).unwrap();
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["model"], "gpt-realtime");
    assert_eq!(update["session"]["voice"], "coral");
    assert_eq!(
        update["session"]["input_audio_transcription"]["model"],
        "gpt-4o-transcribe"
    );
    assert!(
        update["session"]["instructions"]
            .as_str()
            .unwrap()
            .ends_with("Cultural context: Japanese workplace")
    );

    peer.emit(message(json!({"type": "rate_limits.updated", "rate_limits": []})))
        .await;
    peer.emit(DataChannelEvent::Message("not json".to_string()))
        .await;
    peer.emit(message(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "I need clarity on this"
    })))
    .await;
    peer.emit(message(json!({
        "type": "response.output_audio_transcript.done",
        "transcript": "Which part is unclear?"
    })))
    .await;

    assert!(wait_until(|| s.controller.transcript().len() == 2).await);
    assert_eq!(s.controller.state(), SessionState::Connected);

    let transcript = s.controller.stop().await.unwrap();
    let view: Vec<(Speaker, &str)> = transcript
        .iter()
        .map(|e| (e.speaker, e.text.as_str()))
        .collect();
    assert_eq!(
        view,
        vec![
            (Speaker::User, "I need clarity on this"),
            (Speaker::Assistant, "Which part is unclear?")
        ]
    );

    assert!(peer.is_closed());
    assert!(s.input.all_released());
    assert!(!s.controller.is_recording());
    assert!(s.recorder.errors().is_empty());
    assert_eq!(s.recorder.session_ends.lock().clone(), vec![transcript]);
}

#[tokio::test]
async fn test_peer_control_messages() {
    let server = endpoints(200).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::new(),
    );

    s.controller.start().await;
    let peer = s.connector.last_peer().unwrap();
    let _update = peer.next_sent().await.unwrap();

    s.controller.send_text("Let me start with yesterday's blockers").await;
    s.controller.interrupt().await;

    let item: Value = serde_json::from_str(&peer.next_sent().await.unwrap()).unwrap();
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["role"], "user");
    assert_eq!(
        item["item"]["content"][0]["text"],
        "Let me start with yesterday's blockers"
    );

    let create: Value = serde_json::from_str(&peer.next_sent().await.unwrap()).unwrap();
    assert_eq!(create, json!({"type": "response.create"}));

    let cancel: Value = serde_json::from_str(&peer.next_sent().await.unwrap()).unwrap();
    assert_eq!(cancel, json!({"type": "response.cancel"}));

    s.controller.stop().await;
}

#[tokio::test]
async fn test_peer_signaling_failure_releases_resources() {
    let server = endpoints(500).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::new(),
    );

    assert_eq!(s.controller.start().await, SessionState::Error);

    match s.recorder.errors().as_slice() {
        [SessionError::Handshake(msg)] => assert!(msg.contains("500")),
        other => panic!("Expected one Handshake error, got {other:?}"),
    }
    assert!(s.connector.last_peer().unwrap().is_closed());
    assert!(s.input.all_released());
    assert_eq!(
        s.recorder.states(),
        vec![SessionState::Connecting, SessionState::Error]
    );
}

#[tokio::test]
async fn test_peer_control_channel_timeout() {
    let server = endpoints(201).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::silent(),
    );

    assert_eq!(s.controller.start().await, SessionState::Error);

    match s.recorder.errors().as_slice() {
        [SessionError::Handshake(msg)] => assert!(msg.contains("did not open")),
        other => panic!("Expected one Handshake error, got {other:?}"),
    }
    assert!(s.connector.last_peer().unwrap().is_closed());
    assert!(s.input.all_released());
}

#[tokio::test]
async fn test_peer_data_channel_error_fails_session() {
    let server = endpoints(201).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::new(),
    );

    s.controller.start().await;
    let peer = s.connector.last_peer().unwrap();
    peer.emit(DataChannelEvent::Error("SCTP transport failed".to_string()))
        .await;

    assert!(wait_until(|| s.recorder.errors().len() == 1).await);
    match &s.recorder.errors()[0] {
        SessionError::Transport(msg) => assert!(msg.contains("SCTP transport failed")),
        other => panic!("Expected Transport error, got {other:?}"),
    }
    assert_eq!(s.controller.state(), SessionState::Error);
    assert!(peer.is_closed());
    assert!(s.input.all_released());
}

#[tokio::test]
async fn test_peer_protocol_error_message() {
    let server = endpoints(201).await;
    let s = session(
        client_config(&server),
        MockAudioInput::new(),
        MockPeerConnector::new(),
    );

    s.controller.start().await;
    let peer = s.connector.last_peer().unwrap();
    peer.emit(message(json!({
        "type": "error",
        "event_id": "evt_1",
        "error": {
            "type": "invalid_request_error",
            "code": "invalid_value",
            "message": "Invalid modalities"
        }
    })))
    .await;

    assert!(wait_until(|| s.recorder.errors().len() == 1).await);
    assert_eq!(
        s.recorder.errors(),
        vec![SessionError::Transport("Invalid modalities".to_string())]
    );
    assert!(s.controller.transcript().is_empty());
}

#[tokio::test]
async fn test_peer_permission_denied_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let s = session(
        client_config(&server),
        MockAudioInput::denied(),
        MockPeerConnector::new(),
    );

    assert_eq!(s.controller.start().await, SessionState::Error);
    assert!(matches!(
        s.recorder.errors().as_slice(),
        [SessionError::Permission(_)]
    ));
    assert!(s.connector.last_peer().is_none());
}

#[tokio::test]
async fn test_peer_without_connector_is_configuration_error() {
    let server = endpoints(201).await;
    let recorder = Recorder::default();
    let input = Arc::new(MockAudioInput::new());
    let host = HostCapabilities::new(input.clone(), Arc::new(NullAudioOutput));
    let controller =
        SessionController::with_host(recorder.session_config("alloy"), client_config(&server), host)
            .unwrap();

    assert_eq!(controller.start().await, SessionState::Error);
    assert!(matches!(
        recorder.errors().as_slice(),
        [SessionError::InvalidConfiguration(_)]
    ));
    assert_eq!(input.open_count(), 0);
}
