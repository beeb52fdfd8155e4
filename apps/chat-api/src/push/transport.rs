//! Delivery of a single push to a single browser subscription.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::PushConfig;
use crate::models::push_subscription::PushSubscription;

/// Lifetime of a signed VAPID token.
const VAPID_TOKEN_TTL_SECS: i64 = 12 * 3600;

/// Per-request timeout for the push service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a push did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The push service says the subscription no longer exists.
    Gone,
    /// Non-success status other than gone.
    Rejected(u16),
    /// Network or signing failure.
    Transport(String),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gone => f.write_str("subscription gone"),
            Self::Rejected(status) => write!(f, "push service rejected request ({status})"),
            Self::Transport(msg) => write!(f, "push transport error: {msg}"),
        }
    }
}

impl std::error::Error for PushError {}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, target: &PushSubscription, payload: &str) -> Result<(), PushError>;
}

// ---------------------------------------------------------------------------
// Web Push over HTTP
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Signs VAPID (RFC 8292) tokens with an ES256 key.
pub struct VapidSigner {
    key: EncodingKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    pub fn from_pem(pem: &[u8], public_key: String, subject: String) -> Result<Self, String> {
        let key = EncodingKey::from_ec_pem(pem).map_err(|e| format!("invalid VAPID key: {e}"))?;
        Ok(Self {
            key,
            public_key,
            subject,
        })
    }

    /// `Authorization` header value for a request to `endpoint`.
    pub fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let url = reqwest::Url::parse(endpoint).map_err(|e| PushError::Transport(e.to_string()))?;
        let audience = url.origin().ascii_serialization();
        let claims = VapidClaims {
            aud: &audience,
            exp: chrono::Utc::now().timestamp() + VAPID_TOKEN_TTL_SECS,
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.key)
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

/// Sends a body-less push request to the subscription endpoint.
///
/// Message encryption (RFC 8291) is not implemented, so the notification
/// payload is not transmitted. The request wakes the service worker, which
/// then fetches fresh state itself.
pub struct WebPushTransport {
    http: reqwest::Client,
    signer: Option<VapidSigner>,
    ttl_secs: u64,
}

impl WebPushTransport {
    pub fn new(signer: Option<VapidSigner>, ttl_secs: u64) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build push HTTP client: {e}"))?;
        Ok(Self {
            http,
            signer,
            ttl_secs,
        })
    }

    /// Build from config, reading the VAPID key file if one is configured.
    pub fn from_config(config: &PushConfig) -> Result<Self, String> {
        let signer = match (&config.vapid_private_key_pem, &config.vapid_public_key) {
            (Some(path), Some(public_key)) => {
                let pem = std::fs::read(path)
                    .map_err(|e| format!("failed to read VAPID key {path}: {e}"))?;
                let subject = config
                    .vapid_email
                    .clone()
                    .unwrap_or_else(|| "mailto:admin@localhost".to_string());
                Some(VapidSigner::from_pem(&pem, public_key.clone(), subject)?)
            }
            _ => None,
        };
        Self::new(signer, config.ttl_secs)
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(&self, target: &PushSubscription, payload: &str) -> Result<(), PushError> {
        let mut request = self
            .http
            .post(&target.endpoint)
            .header("TTL", self.ttl_secs.to_string())
            .header(reqwest::header::CONTENT_LENGTH, "0");
        if let Some(signer) = &self.signer {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                signer.authorization(&target.endpoint)?,
            );
        }

        tracing::debug!(
            endpoint = %target.endpoint,
            payload_len = payload.len(),
            "sending web push"
        );

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;
        classify_status(response.status())
    }
}

fn classify_status(status: StatusCode) -> Result<(), PushError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone),
        other => Err(PushError::Rejected(other.as_u16())),
    }
}

// ---------------------------------------------------------------------------
// Logging transport
// ---------------------------------------------------------------------------

/// Used when no VAPID key is configured: records the push and succeeds.
pub struct LogTransport;

#[async_trait]
impl PushTransport for LogTransport {
    async fn send(&self, target: &PushSubscription, payload: &str) -> Result<(), PushError> {
        tracing::info!(
            user_id = target.user_id,
            endpoint = %target.endpoint,
            %payload,
            "push notification (not sent, no VAPID key)"
        );
        Ok(())
    }
}
