//! Inbound mailer webhook verification and event parsing.
//!
//! Events arrive as a JSON array, each carrying a type, the recipient
//! address, the provider message id they relate to, a timestamp and an
//! optional reason. Authenticity is HMAC-SHA256 over
//! `timestamp || raw_body`, base64-encoded, compared in constant time.

use base64::{engine::general_purpose::STANDARD, Engine};
use cadre_data_model::EmailStatus;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const FRESHNESS_WINDOW_SECONDS: i64 = 600;
const FUTURE_SKEW_TOLERANCE_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature or timestamp header")]
    MissingHeaders,

    #[error("timestamp is not a valid unix time")]
    InvalidTimestamp,

    #[error("timestamp outside the freshness window")]
    Stale,

    #[error("signature does not match")]
    InvalidSignature,

    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

/// Verifies a webhook request's signature and timestamp freshness.
///
/// When `verification_key` is `None`, verification is skipped and a
/// warning is logged — dev-mode only, per the original service's
/// behavior; production deployments must configure a key.
pub fn verify_signature(
    raw_body: &[u8],
    signature_b64: Option<&str>,
    timestamp: Option<&str>,
    verification_key: Option<&[u8]>,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let Some(key) = verification_key else {
        tracing::warn!("mail webhook verification key not configured, skipping signature check (dev mode only)");
        return Ok(());
    };

    let (signature_b64, timestamp) = match (signature_b64, timestamp) {
        (Some(s), Some(t)) => (s, t),
        _ => return Err(WebhookError::MissingHeaders),
    };

    let webhook_time: i64 = timestamp.parse().map_err(|_| WebhookError::InvalidTimestamp)?;
    let age = now.timestamp() - webhook_time;
    if !(-FUTURE_SKEW_TOLERANCE_SECONDS..=FRESHNESS_WINDOW_SECONDS).contains(&age) {
        return Err(WebhookError::Stale);
    }

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(raw_body);
    let expected = STANDARD.encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), signature_b64.as_bytes()) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Delivered,
    Bounce,
    Dropped,
    SpamReport,
    Unsubscribe,
    Open,
    Click,
    #[serde(other)]
    Other,
}

impl WebhookEventType {
    /// The `email_status` transition this event implies, if any. Only
    /// deliverability-affecting events update the user record.
    #[must_use]
    pub fn email_status(self) -> Option<EmailStatus> {
        match self {
            Self::Bounce | Self::Dropped => Some(EmailStatus::Bounced),
            Self::SpamReport => Some(EmailStatus::SpamReported),
            Self::Unsubscribe => Some(EmailStatus::Unsubscribed),
            Self::Delivered | Self::Open | Self::Click | Self::Other => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "event")]
    pub event_type: WebhookEventType,
    pub email: String,
    #[serde(rename = "sg_message_id")]
    pub provider_message_id: Option<String>,
    pub timestamp: i64,
    pub reason: Option<String>,
}

/// Parses the provider's batched webhook body into individual events.
pub fn parse_events(raw_body: &[u8]) -> Result<Vec<WebhookEvent>, WebhookError> {
    serde_json::from_slice(raw_body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], timestamp: &str, key: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature_within_window() {
        let key = b"webhook-secret";
        let body = br#"[{"event":"bounce","email":"a@example.com","timestamp":1000}]"#;
        let now = DateTime::from_timestamp(1030, 0).unwrap();
        let sig = sign(body, "1000", key);
        assert!(verify_signature(body, Some(&sig), Some("1000"), Some(key), now).is_ok());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let key = b"webhook-secret";
        let body = b"{}";
        let now = DateTime::from_timestamp(10_000, 0).unwrap();
        let sig = sign(body, "1000", key);
        assert!(matches!(
            verify_signature(body, Some(&sig), Some("1000"), Some(key), now),
            Err(WebhookError::Stale)
        ));
    }

    #[test]
    fn allows_small_future_skew() {
        let key = b"webhook-secret";
        let body = b"{}";
        let now = DateTime::from_timestamp(940, 0).unwrap();
        let sig = sign(body, "1000", key);
        assert!(verify_signature(body, Some(&sig), Some("1000"), Some(key), now).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let key = b"webhook-secret";
        let body = b"{}";
        let now = DateTime::from_timestamp(1000, 0).unwrap();
        let sig = sign(body, "1000", key);
        assert!(matches!(
            verify_signature(b"{\"x\":1}", Some(&sig), Some("1000"), Some(key), now),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn skips_verification_without_configured_key() {
        assert!(verify_signature(b"{}", None, None, None, Utc::now()).is_ok());
    }

    #[test]
    fn parses_event_batch_and_maps_status() {
        let body = br#"[{"event":"bounce","email":"a@example.com","sg_message_id":"abc","timestamp":1000,"reason":"mailbox full"}]"#;
        let events = parse_events(body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.email_status(), Some(EmailStatus::Bounced));
    }
}
