//! Settlement batches: periodic aggregation of succeeded transactions
//! into a payout for a merchant or a super-merchant.
//!
//! A batch is assembled from the transactions falling inside a half-open
//! window `[period_start, period_end)` on `processed_at`. Once created
//! it only moves forward: PENDING -> PROCESSING -> COMPLETED | FAILED.
//! Terminal batches are immutable; a failed payout is corrected by a new
//! batch, never by editing the old one.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::transaction::{Transaction, UnknownValue};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("settlement cannot move from {from} to {to}")]
pub struct InvalidAdvance {
    pub from: SettlementStatus,
    pub to: SettlementStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Processing => "PROCESSING",
            SettlementStatus::Completed => "COMPLETED",
            SettlementStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Completed | SettlementStatus::Failed)
    }

    pub fn can_advance(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(SettlementStatus::Pending),
            "PROCESSING" => Ok(SettlementStatus::Processing),
            "COMPLETED" => Ok(SettlementStatus::Completed),
            "FAILED" => Ok(SettlementStatus::Failed),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayeeKind {
    Merchant,
    SuperMerchant,
}

impl PayeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayeeKind::Merchant => "MERCHANT",
            PayeeKind::SuperMerchant => "SUPER_MERCHANT",
        }
    }
}

impl fmt::Display for PayeeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayeeKind {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "MERCHANT" => Ok(PayeeKind::Merchant),
            "SUPER_MERCHANT" => Ok(PayeeKind::SuperMerchant),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// The party a batch pays out to. A transaction can appear in two
/// batches over its lifetime, one per kind: its merchant's payout and
/// its super-merchant's commission payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub kind: PayeeKind,
    pub id: Uuid,
}

impl Payee {
    pub fn merchant(id: Uuid) -> Self {
        Self {
            kind: PayeeKind::Merchant,
            id,
        }
    }

    pub fn super_merchant(id: Uuid) -> Self {
        Self {
            kind: PayeeKind::SuperMerchant,
            id,
        }
    }
}

impl fmt::Display for Payee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct SettlementBatch {
    pub id: Uuid,
    pub payee: Payee,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub transaction_count: i32,
    pub amount_total: BigDecimal,
    pub fee_total: BigDecimal,
    pub net_amount: BigDecimal,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SettlementBatch {
    /// Pure aggregation over the window's candidate transactions.
    ///
    /// Merchant payout: gross amount minus all fee components. The
    /// per-transaction identity `net = amount - fees` makes
    /// `net_amount == amount_total - fee_total` exact here with no
    /// re-rounding.
    ///
    /// Super-merchant payout: the commission slices themselves, no
    /// further deduction.
    pub fn assemble(
        payee: Payee,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        transactions: &[Transaction],
        now: DateTime<Utc>,
    ) -> Self {
        let zero = BigDecimal::from(0);
        let (amount_total, fee_total) = match payee.kind {
            PayeeKind::Merchant => {
                let amount = transactions
                    .iter()
                    .fold(zero.clone(), |acc, tx| acc + &tx.amount);
                let fees = transactions.iter().fold(zero.clone(), |acc, tx| {
                    acc + &tx.merchant_fee + &tx.super_merchant_fee + &tx.gateway_fee
                });
                (amount, fees)
            }
            PayeeKind::SuperMerchant => {
                let commission = transactions
                    .iter()
                    .fold(zero.clone(), |acc, tx| acc + &tx.super_merchant_fee);
                (commission, zero.clone())
            }
        };
        let net_amount = &amount_total - &fee_total;

        Self {
            id: Uuid::new_v4(),
            payee,
            period_start,
            period_end,
            transaction_count: transactions.len() as i32,
            amount_total,
            fee_total,
            net_amount,
            status: SettlementStatus::Pending,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    pub fn advance(
        &mut self,
        next: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidAdvance> {
        if !self.status.can_advance(next) {
            return Err(InvalidAdvance {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = now;
        if next.is_terminal() && self.processed_at.is_none() {
            self.processed_at = Some(now);
        }

        Ok(())
    }
}
