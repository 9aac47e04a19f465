//! Transaction domain entity and its lifecycle state machine.
//!
//! Status moves forward only. Every mutation that changes status goes
//! through [`Transaction::transition`], which rejects anything outside
//! the declared graph:
//!
//! ```text
//! PENDING         -> PROCESSING | FAILED | CANCELLED
//! PROCESSING      -> SUCCEEDED | REQUIRES_ACTION | FAILED | CANCELLED
//! REQUIRES_ACTION -> SUCCEEDED | FAILED
//! SUCCEEDED       -> REFUNDED
//! FAILED | CANCELLED | REFUNDED -> (terminal)
//! ```

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Fraud scores at or above this are held for manual review.
pub const FRAUD_REVIEW_THRESHOLD: i32 = 70;
/// Fraud scores at or above this are blocked before any gateway call.
pub const FRAUD_BLOCK_THRESHOLD: i32 = 90;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transaction cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::RequiresAction => "REQUIRES_ACTION",
            TransactionStatus::Succeeded => "SUCCEEDED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    /// States that admit no further transition at all.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Cancelled | TransactionStatus::Refunded
        )
    }

    pub fn can_transition(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Succeeded)
                | (Processing, RequiresAction)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (RequiresAction, Succeeded)
                | (RequiresAction, Failed)
                | (Succeeded, Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "REQUIRES_ACTION" => Ok(TransactionStatus::RequiresAction),
            "SUCCEEDED" => Ok(TransactionStatus::Succeeded),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudStatus {
    Clean,
    Review,
    Blocked,
}

impl FraudStatus {
    pub fn from_score(score: i32) -> Self {
        if score >= FRAUD_BLOCK_THRESHOLD {
            FraudStatus::Blocked
        } else if score >= FRAUD_REVIEW_THRESHOLD {
            FraudStatus::Review
        } else {
            FraudStatus::Clean
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FraudStatus::Clean => "CLEAN",
            FraudStatus::Review => "REVIEW",
            FraudStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for FraudStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FraudStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CLEAN" => Ok(FraudStatus::Clean),
            "REVIEW" => Ok(FraudStatus::Review),
            "BLOCKED" => Ok(FraudStatus::Blocked),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Other => "OTHER",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CARD" => Ok(PaymentMethod::Card),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "WALLET" => Ok(PaymentMethod::Wallet),
            "OTHER" => Ok(PaymentMethod::Other),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreeDsStatus {
    NotRequired,
    Pending,
    Confirmed,
    Failed,
}

impl ThreeDsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreeDsStatus::NotRequired => "NOT_REQUIRED",
            ThreeDsStatus::Pending => "PENDING",
            ThreeDsStatus::Confirmed => "CONFIRMED",
            ThreeDsStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ThreeDsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreeDsStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NOT_REQUIRED" => Ok(ThreeDsStatus::NotRequired),
            "PENDING" => Ok(ThreeDsStatus::Pending),
            "CONFIRMED" => Ok(ThreeDsStatus::Confirmed),
            "FAILED" => Ok(ThreeDsStatus::Failed),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Inputs for a freshly created transaction. Fees are computed by the
/// caller before construction so the entity is born with its full
/// breakdown recorded.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub merchant_id: Uuid,
    pub super_merchant_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub merchant_fee: BigDecimal,
    pub super_merchant_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub fraud_score: Option<i32>,
    pub fraud_status: Option<FraudStatus>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub merchant_id: Uuid,
    pub super_merchant_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub merchant_fee: BigDecimal,
    pub super_merchant_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub status: TransactionStatus,
    pub fraud_score: Option<i32>,
    pub fraud_status: Option<FraudStatus>,
    pub requires_3ds: bool,
    pub three_ds_status: ThreeDsStatus,
    pub three_ds_url: Option<String>,
    pub three_ds_issued_at: Option<DateTime<Utc>>,
    pub gateway_payment_id: Option<String>,
    pub gateway_status: Option<String>,
    pub failure_reason: Option<String>,
    pub settlement_id: Option<Uuid>,
    pub commission_settlement_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    /// Optimistic concurrency guard, bumped by the store on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stamped once, on first reaching SUCCEEDED, FAILED or CANCELLED.
    /// Settlement windows select on this timestamp.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(params: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: params.external_id,
            merchant_id: params.merchant_id,
            super_merchant_id: params.super_merchant_id,
            amount: params.amount,
            currency: params.currency,
            payment_method: params.payment_method,
            merchant_fee: params.merchant_fee,
            super_merchant_fee: params.super_merchant_fee,
            gateway_fee: params.gateway_fee,
            net_amount: params.net_amount,
            status: TransactionStatus::Pending,
            fraud_score: params.fraud_score,
            fraud_status: params.fraud_status,
            requires_3ds: false,
            three_ds_status: ThreeDsStatus::NotRequired,
            three_ds_url: None,
            three_ds_issued_at: None,
            gateway_payment_id: None,
            gateway_status: None,
            failure_reason: None,
            settlement_id: None,
            commission_settlement_id: None,
            customer_email: params.customer_email,
            customer_name: params.customer_name,
            version: 0,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Moves the transaction along the lifecycle graph. `processed_at`
    /// is stamped on the first terminal-outcome transition and never
    /// overwritten afterwards.
    pub fn transition(
        &mut self,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = now;
        if matches!(
            next,
            TransactionStatus::Succeeded | TransactionStatus::Failed | TransactionStatus::Cancelled
        ) && self.processed_at.is_none()
        {
            self.processed_at = Some(now);
        }

        Ok(())
    }

    /// Transition to FAILED with a human-readable reason preserved for
    /// the merchant-facing surface.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(TransactionStatus::Failed, now)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Records the upstream payment id. Set once; the gateway reference
    /// is the join key for webhooks and reconciliation.
    pub fn record_gateway_reference(&mut self, gateway_id: impl Into<String>) {
        if self.gateway_payment_id.is_none() {
            self.gateway_payment_id = Some(gateway_id.into());
        }
    }

    /// Keeps the raw upstream status string for audit; the normalized
    /// status drives all behavior.
    pub fn record_gateway_status(&mut self, raw: impl Into<String>) {
        self.gateway_status = Some(raw.into());
    }

    pub fn open_three_ds_challenge(&mut self, url: Option<String>, now: DateTime<Utc>) {
        self.requires_3ds = true;
        self.three_ds_status = ThreeDsStatus::Pending;
        self.three_ds_url = url;
        self.three_ds_issued_at = Some(now);
        self.updated_at = now;
    }

    pub fn three_ds_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        matches!(self.three_ds_status, ThreeDsStatus::Pending)
            && self
                .three_ds_issued_at
                .map(|issued| now - issued > ttl)
                .unwrap_or(false)
    }

    /// The 3DS status as seen by callers: a pending challenge past its
    /// TTL reads as FAILED without waiting for a background sweep.
    pub fn effective_three_ds_status(&self, now: DateTime<Utc>, ttl: Duration) -> ThreeDsStatus {
        if self.three_ds_expired(now, ttl) {
            ThreeDsStatus::Failed
        } else {
            self.three_ds_status
        }
    }
}
