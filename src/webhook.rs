// webhook.rs
//! Stripe webhook signature verification.
//!
//! Stripe signs each delivery with HMAC-SHA256 over `"{timestamp}.{body}"` and
//! sends the result in the `Stripe-Signature` header, e.g.
//! `t=1492774577,v1=5257a869...,v0=6ffbb59b...`. Only `v1` signatures are
//! checked.
//! Reference: https://docs.stripe.com/webhooks#verify-manually

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::events::Event;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

const SIGNING_SCHEME: &str = "v1";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook has no Stripe-Signature header")]
    MissingHeader,
    #[error("webhook has invalid Stripe-Signature header")]
    InvalidHeader,
    #[error("webhook has no timestamp")]
    NoTimestamp,
    #[error("webhook has no v1 signatures")]
    NoSignatures,
    #[error("timestamp is {age_secs}s old, outside the {tolerance_secs}s tolerance")]
    TimestampOutsideTolerance { age_secs: i64, tolerance_secs: u64 },
    #[error("webhook has no valid signature")]
    NoValidSignature,
    #[error("webhook payload is not a valid event: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.to_string(),
            tolerance_secs,
        }
    }

    /// Verifies the delivery against the current time and parses the event.
    pub fn construct_event(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<Event, SignatureError> {
        self.construct_event_at(payload, headers, Utc::now().timestamp())
    }

    pub fn construct_event_at(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
        now: i64,
    ) -> Result<Event, SignatureError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .ok_or(SignatureError::MissingHeader)?
            .to_str()
            .map_err(|_| SignatureError::InvalidHeader)?;

        self.verify_at(payload, header, now)?;

        Ok(serde_json::from_slice(payload)?)
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let header = SignatureHeader::parse(header)?;

        let age_secs = now
            .checked_sub(header.timestamp)
            .ok_or(SignatureError::InvalidHeader)?;
        if age_secs > 0 && age_secs as u64 > self.tolerance_secs {
            return Err(SignatureError::TimestampOutsideTolerance {
                age_secs,
                tolerance_secs: self.tolerance_secs,
            });
        }

        // verify_slice compares in constant time
        let matched = header.signatures.iter().any(|signature| {
            signed_payload_mac(self.secret.as_bytes(), header.timestamp, payload)
                .verify_slice(signature)
                .is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::NoValidSignature)
        }
    }
}

#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Result<Self, SignatureError> {
        if header.trim().is_empty() {
            return Err(SignatureError::MissingHeader);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();

        for pair in header.split(',') {
            let (key, value) = pair
                .trim()
                .split_once('=')
                .ok_or(SignatureError::InvalidHeader)?;

            match key {
                "t" => {
                    let parsed = value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::InvalidHeader)?;
                    timestamp = Some(parsed);
                }
                SIGNING_SCHEME => {
                    // Undecodable entries are skipped, another one may still match.
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::NoTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::NoSignatures);
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn signed_payload_mac(secret: &[u8], timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Computes the hex `v1` signature Stripe would send for this payload.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mac = signed_payload_mac(secret.as_bytes(), timestamp, payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a complete `Stripe-Signature` header value for this payload.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={},{}={}",
        timestamp,
        SIGNING_SCHEME,
        sign_payload(secret, timestamp, payload)
    )
}
