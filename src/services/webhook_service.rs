//! Webhook event sink.
//!
//! Delivers each lifecycle event as an HTTP POST to a configured endpoint,
//! signed with HMAC-SHA256 so the receiver can verify it came from us.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::event::TransferEvent;
use crate::services::event_publisher::{EventSink, PublishError};

type HmacSha256 = Hmac<Sha256>;

/// Per-delivery timeout; prevents hanging on slow endpoints.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while configuring the webhook sink.
#[derive(Debug, thiserror::Error)]
pub enum WebhookConfigError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Sink that POSTs signed events to one endpoint.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>`
/// - `X-Webhook-Event-Id: <uuid>`
/// - `X-Webhook-Topic: transfer.<kind>`
pub struct WebhookEventSink {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookEventSink {
    pub fn new(url: &str, secret: &str) -> Result<Self, WebhookConfigError> {
        validate_webhook_url(url)?;

        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &TransferEvent) -> Result<(), PublishError> {
        let payload_json = serde_json::to_string(event)?;
        let signature = generate_signature(&self.secret, &payload_json);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Event-Id", event.event_id.to_string())
            .header("X-Webhook-Topic", event.topic.as_str())
            .body(payload_json)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}

/// Generate HMAC-SHA256 signature for a webhook payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers should:
/// 1. Extract signature from `X-Webhook-Signature` header
/// 2. Compute HMAC-SHA256(secret, request_body)
/// 3. Compare using constant-time comparison
fn generate_signature(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    format!("sha256={}", hex::encode(result.into_bytes()))
}

/// Validate webhook URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
fn validate_webhook_url(url: &str) -> Result<(), WebhookConfigError> {
    if url.len() > 2048 {
        return Err(WebhookConfigError::InvalidUrl(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| WebhookConfigError::InvalidUrl("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            // Allow HTTP for localhost/127.0.0.1 (testing)
            if matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0")
            ) {
                Ok(())
            } else {
                Err(WebhookConfigError::InvalidUrl(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(WebhookConfigError::InvalidUrl(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format_and_determinism() {
        let a = generate_signature("secret", r#"{"topic":"transfer.completed"}"#);
        let b = generate_signature("secret", r#"{"topic":"transfer.completed"}"#);
        let c = generate_signature("other", r#"{"topic":"transfer.completed"}"#);

        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_url_rules() {
        assert!(validate_webhook_url("https://hooks.example.com/transfers").is_ok());
        assert!(validate_webhook_url("http://localhost:9000/hook").is_ok());
        assert!(validate_webhook_url("http://hooks.example.com/transfers").is_err());
        assert!(validate_webhook_url("ftp://hooks.example.com").is_err());
        assert!(validate_webhook_url("not a url").is_err());
    }
}
