//! Offer/answer exchange with the realtime signaling endpoint.

use std::time::Duration;
use tracing::debug;

use crate::core::realtime::base::{SessionError, SessionResult};
use crate::core::realtime::credential::Credential;

/// Posts SDP offers and returns the answer SDP.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl SignalingClient {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| {
                SessionError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
        })
    }

    /// Send the local offer and return the remote answer.
    ///
    /// Any transport failure, non-2xx status or empty body is a
    /// [`SessionError::Handshake`].
    pub async fn exchange(&self, offer_sdp: &str, credential: &Credential) -> SessionResult<String> {
        debug!("Posting SDP offer to {} (model {})", self.url, self.model);

        let response = self
            .client
            .post(&self.url)
            .query(&[("model", self.model.as_str())])
            .bearer_auth(credential.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to post SDP offer: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Handshake(format!("Failed to read SDP answer: {e}")))?;

        if !status.is_success() {
            return Err(SessionError::Handshake(format!(
                "Signaling endpoint returned {status}: {body}"
            )));
        }

        if body.trim().is_empty() {
            return Err(SessionError::Handshake(
                "Signaling endpoint returned an empty answer".to_string(),
            ));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n";
    const ANSWER: &str = "v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\n";

    #[tokio::test]
    async fn test_exchange_posts_offer_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/calls"))
            .and(query_param("model", "gpt-realtime"))
            .and(header("authorization", "Bearer ek_test"))
            .and(header("content-type", "application/sdp"))
            .and(body_string(OFFER))
            .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER))
            .expect(1)
            .mount(&server)
            .await;

        let client = SignalingClient::new(
            format!("{}/v1/realtime/calls", server.uri()),
            "gpt-realtime",
            Duration::from_secs(5),
        )
        .unwrap();
        let credential = Credential::new("ek_test", None);

        let answer = client.exchange(OFFER, &credential).await.unwrap();
        assert_eq!(answer, ANSWER);
    }

    #[tokio::test]
    async fn test_exchange_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let client =
            SignalingClient::new(server.uri(), "gpt-realtime", Duration::from_secs(5)).unwrap();
        let result = client.exchange(OFFER, &Credential::new("bad", None)).await;

        match result {
            Err(SessionError::Handshake(msg)) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("invalid key"));
            }
            other => panic!("Expected Handshake error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_rejects_empty_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client =
            SignalingClient::new(server.uri(), "gpt-realtime", Duration::from_secs(5)).unwrap();
        let result = client.exchange(OFFER, &Credential::new("ek", None)).await;
        assert!(matches!(result, Err(SessionError::Handshake(_))));
    }
}
