//! Short-lived session credentials issued by the token endpoint.
//!
//! A credential is fetched once per `start()`, moved into the transport for
//! the handshake and dropped afterwards. The token is zeroized on drop and
//! never appears in `Debug` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroize;

use super::base::{SessionError, SessionResult};

// =============================================================================
// Credential
// =============================================================================

/// Ephemeral bearer credential for one session.
pub struct Credential {
    token: String,
    expires_at: Option<i64>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// The raw token, for building an authorization header.
    pub fn expose(&self) -> &str {
        &self.token
    }

    /// `Bearer <token>` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Expiry as Unix seconds, when the endpoint reported one.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

// =============================================================================
// Token Endpoint
// =============================================================================

/// Body posted to the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cultural_context: Option<String>,
    pub session_config: TokenSessionConfig,
}

/// Session options forwarded with the token request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSessionConfig {
    pub voice: String,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Source of session credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Request a fresh credential. Failures map to [`SessionError::Credential`].
    async fn fetch(&self, request: &TokenRequest) -> SessionResult<Credential>;
}

/// Fetches credentials from an HTTP token endpoint.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| {
                SessionError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Reuse an existing HTTP client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self, request: &TokenRequest) -> SessionResult<Credential> {
        debug!("Requesting session credential from {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Credential(format!("Failed to request token: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SessionError::Credential(format!(
                "Token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Credential(format!("Failed to parse token response: {e}")))?;

        match token.value {
            Some(value) if !value.is_empty() => Ok(Credential::new(value, token.expires_at)),
            _ => Err(SessionError::Credential(
                "Token response did not contain a value".to_string(),
            )),
        }
    }
}
