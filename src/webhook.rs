//! Gateway webhook authenticity and payload types.
//!
//! The signature is HMAC-SHA256 over the exact raw request bytes, hex
//! encoded, carried in the `X-CircoFlows-Signature` header. Verification
//! fails closed: missing secret, malformed signature, any mismatch.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::TransactionStatus;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-circoflows-signature";

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Constant-time verification of a hex signature over the raw
    /// payload. Never parses the payload.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let decoded = match hex::decode(signature.trim()) {
            Ok(decoded) => decoded,
            Err(_) => return false,
        };
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        mac.verify_slice(&decoded).is_ok()
    }

    /// Produces the signature the gateway would send. Used by tests and
    /// the sandbox tooling.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Authorized,
    Captured,
    Succeeded,
    Failed,
    Refunded,
}

impl EventKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "payment.authorized" => Some(EventKind::Authorized),
            "payment.captured" => Some(EventKind::Captured),
            "payment.succeeded" => Some(EventKind::Succeeded),
            "payment.failed" => Some(EventKind::Failed),
            "payment.refunded" => Some(EventKind::Refunded),
            _ => None,
        }
    }

    /// The lifecycle status this event drives a transaction towards.
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            EventKind::Authorized => TransactionStatus::Processing,
            EventKind::Captured | EventKind::Succeeded => TransactionStatus::Succeeded,
            EventKind::Failed => TransactionStatus::Failed,
            EventKind::Refunded => TransactionStatus::Refunded,
        }
    }
}

/// A gateway callback, normalized from the wire shape. The gateway
/// sends either flat fields or a nested `data` object depending on the
/// event generation; both collapse to this.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub event: String,
    pub payment_id: String,
    pub status: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl GatewayEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_slice(payload)?;
        let data = raw.data.unwrap_or_default();
        Ok(GatewayEvent {
            event: raw.event,
            payment_id: raw.payment_id.or(data.payment_id).unwrap_or_default(),
            status: raw.status.or(data.status),
            amount: raw.amount.or(data.amount),
            currency: raw.currency.or(data.currency),
            timestamp: raw.timestamp,
            failure_reason: raw.failure_reason.or(data.failure_reason),
        })
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event)
    }
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    payment_id: Option<String>,
    status: Option<String>,
    amount: Option<String>,
    currency: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    data: Option<RawEventData>,
}

#[derive(Deserialize, Default)]
struct RawEventData {
    payment_id: Option<String>,
    status: Option<String>,
    amount: Option<String>,
    currency: Option<String>,
    failure_reason: Option<String>,
}
