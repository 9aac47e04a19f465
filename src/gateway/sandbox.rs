//! Deterministic sandbox gateway. Outcomes are a pure function of the
//! recognizable test card numbers below; there is no randomness
//! anywhere, so a test that passes once passes always.

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

use super::{CardDetails, ChargeRequest, GatewayError, GatewayResult, normalize_status};
use crate::validation::normalize_card_number;
use bigdecimal::BigDecimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardOutcome {
    Success,
    RequiresThreeDs,
    Declined(&'static str),
}

/// Sentinel card numbers and the scenario each one triggers.
const TEST_CARDS: &[(&str, CardOutcome)] = &[
    ("4242424242424242", CardOutcome::Success),
    ("4111111111111111", CardOutcome::Success),
    ("5555555555554444", CardOutcome::Success),
    ("378282246310005", CardOutcome::Success),
    ("4000000000003220", CardOutcome::RequiresThreeDs),
    ("4000002500003155", CardOutcome::RequiresThreeDs),
    ("4000000000000002", CardOutcome::Declined("Your card was declined")),
    ("4000000000009995", CardOutcome::Declined("Insufficient funds")),
    ("4000000000000069", CardOutcome::Declined("Your card has expired")),
    ("4000000000000127", CardOutcome::Declined("Incorrect CVC code")),
    (
        "4000000000000119",
        CardOutcome::Declined("An error occurred while processing your card"),
    ),
];

#[derive(Debug, Clone)]
struct SandboxPayment {
    raw_status: String,
    requires_3ds: bool,
    three_ds_url: Option<String>,
    payment_url: Option<String>,
    failure_reason: Option<String>,
}

impl SandboxPayment {
    fn to_result(&self, payment_id: &str) -> GatewayResult {
        GatewayResult {
            payment_id: payment_id.to_string(),
            status: normalize_status(&self.raw_status),
            raw_status: self.raw_status.clone(),
            requires_3ds: self.requires_3ds,
            three_ds_url: self.three_ds_url.clone(),
            payment_url: self.payment_url.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }
}

#[derive(Default)]
struct SandboxState {
    /// merchant_reference -> payment id. A replayed create returns the
    /// recorded charge instead of charging again.
    charges: DashMap<String, String>,
    payments: DashMap<String, SandboxPayment>,
    charge_count: AtomicU64,
    outage_budget: AtomicU32,
}

#[derive(Clone, Default)]
pub struct SandboxGateway {
    state: Arc<SandboxState>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail as unavailable. Lets tests
    /// drive the retry path without any real network.
    pub fn inject_outages(&self, count: u32) {
        self.state.outage_budget.store(count, Ordering::SeqCst);
    }

    /// Number of distinct charges actually taken. Replays do not count.
    pub fn charge_count(&self) -> u64 {
        self.state.charge_count.load(Ordering::SeqCst)
    }

    fn consume_outage(&self) -> Result<(), GatewayError> {
        let consumed = self
            .state
            .outage_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(GatewayError::unavailable("sandbox outage injected"))
        } else {
            Ok(())
        }
    }

    fn replay(&self, merchant_reference: &str) -> Option<GatewayResult> {
        let payment_id = self
            .state
            .charges
            .get(merchant_reference)
            .map(|entry| entry.value().clone())?;
        self.state
            .payments
            .get(&payment_id)
            .map(|payment| payment.to_result(&payment_id))
    }

    fn record_charge(
        &self,
        request: &ChargeRequest,
        raw_status: &str,
        requires_3ds: bool,
        payment_url: Option<String>,
    ) -> GatewayResult {
        let payment_id = format!("sb_{}", Uuid::new_v4().simple());
        let payment = SandboxPayment {
            raw_status: raw_status.to_string(),
            requires_3ds,
            three_ds_url: if requires_3ds {
                Some(format!("https://sandbox.circoflows.test/3ds/{}", payment_id))
            } else {
                None
            },
            payment_url,
            failure_reason: None,
        };
        let result = payment.to_result(&payment_id);
        self.state.payments.insert(payment_id.clone(), payment);
        self.state
            .charges
            .insert(request.merchant_reference.clone(), payment_id);
        self.state.charge_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    pub async fn create_direct_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        if let Some(result) = self.replay(&request.merchant_reference) {
            return Ok(result);
        }

        let card = request
            .card
            .as_ref()
            .ok_or_else(|| GatewayError::protocol("card details required for direct payment"))?;

        match evaluate_card(card, Utc::now()) {
            // declines never produce a gateway payment id
            CardOutcome::Declined(reason) => Err(GatewayError::declined(reason)),
            CardOutcome::Success => Ok(self.record_charge(request, "completed", false, None)),
            CardOutcome::RequiresThreeDs => {
                Ok(self.record_charge(request, "requires_3ds", true, None))
            }
        }
    }

    pub async fn create_hosted_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        if let Some(result) = self.replay(&request.merchant_reference) {
            return Ok(result);
        }

        let payment_id = format!("sb_{}", Uuid::new_v4().simple());
        let payment = SandboxPayment {
            raw_status: "pending".to_string(),
            requires_3ds: false,
            three_ds_url: None,
            payment_url: Some(format!(
                "https://sandbox.circoflows.test/checkout/{}",
                payment_id
            )),
            failure_reason: None,
        };
        let result = payment.to_result(&payment_id);
        self.state.payments.insert(payment_id.clone(), payment);
        self.state
            .charges
            .insert(request.merchant_reference.clone(), payment_id);
        self.state.charge_count.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    pub async fn confirm_three_ds(
        &self,
        payment_id: &str,
        result: &str,
    ) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        let mut payment = self
            .state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| GatewayError::protocol(format!("unknown payment: {}", payment_id)))?;
        if !payment.requires_3ds {
            return Err(GatewayError::protocol("payment does not require 3DS"));
        }

        if result == "authenticated" {
            payment.raw_status = "completed".to_string();
            payment.failure_reason = None;
        } else {
            payment.raw_status = "failed".to_string();
            payment.failure_reason = Some("3DS authentication failed".to_string());
        }
        Ok(payment.to_result(payment_id))
    }

    pub async fn get_status(&self, payment_id: &str) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        self.state
            .payments
            .get(payment_id)
            .map(|payment| payment.to_result(payment_id))
            .ok_or_else(|| GatewayError::protocol(format!("unknown payment: {}", payment_id)))
    }

    pub async fn capture(
        &self,
        payment_id: &str,
        _amount: Option<&BigDecimal>,
    ) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        let mut payment = self
            .state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| GatewayError::protocol(format!("unknown payment: {}", payment_id)))?;
        payment.raw_status = "completed".to_string();
        Ok(payment.to_result(payment_id))
    }

    pub async fn refund(
        &self,
        payment_id: &str,
        _amount: Option<&BigDecimal>,
        _reason: Option<&str>,
    ) -> Result<GatewayResult, GatewayError> {
        self.consume_outage()?;
        let mut payment = self
            .state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| GatewayError::protocol(format!("unknown payment: {}", payment_id)))?;
        if payment.raw_status != "completed" {
            return Err(GatewayError::declined("Payment is not in a refundable state"));
        }
        payment.raw_status = "refunded".to_string();
        Ok(payment.to_result(payment_id))
    }
}

fn evaluate_card(card: &CardDetails, now: DateTime<Utc>) -> CardOutcome {
    if card.cvv == "000" {
        return CardOutcome::Declined("Incorrect CVV code");
    }
    if expiry_in_past(&card.expiry, now) {
        return CardOutcome::Declined("Card has expired");
    }

    let digits = normalize_card_number(&card.number);
    TEST_CARDS
        .iter()
        .find(|(number, _)| *number == digits)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(CardOutcome::Success)
}

fn expiry_in_past(expiry: &str, now: DateTime<Utc>) -> bool {
    let (month_part, year_part) = match expiry.split_once('/') {
        Some(parts) => parts,
        None => return false,
    };
    let month: u32 = match month_part.parse() {
        Ok(month) => month,
        Err(_) => return false,
    };
    let year: i32 = match year_part.parse() {
        Ok(year) => year,
        Err(_) => return false,
    };
    (2000 + year, month) < (now.year(), now.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayStatus;
    use std::str::FromStr;

    fn request_with_card(number: &str, reference: &str) -> ChargeRequest {
        ChargeRequest {
            merchant_reference: reference.to_string(),
            amount: BigDecimal::from_str("100.00").unwrap(),
            currency: "USD".to_string(),
            card: Some(CardDetails {
                number: number.to_string(),
                expiry: "12/30".to_string(),
                cvv: "123".to_string(),
                holder_name: None,
            }),
            customer_email: None,
            customer_name: None,
            return_url: None,
            webhook_url: None,
        }
    }

    #[tokio::test]
    async fn success_cards_complete() {
        let sandbox = SandboxGateway::new();
        for (idx, number) in [
            "4242424242424242",
            "4111111111111111",
            "5555555555554444",
            "378282246310005",
        ]
        .iter()
        .enumerate()
        {
            let request = request_with_card(number, &format!("ref-{}", idx));
            let result = sandbox.create_direct_payment(&request).await.unwrap();
            assert_eq!(result.status, GatewayStatus::Succeeded, "card {}", number);
            assert_eq!(result.raw_status, "completed");
            assert!(result.payment_id.starts_with("sb_"));
        }
        assert_eq!(sandbox.charge_count(), 4);
    }

    #[tokio::test]
    async fn three_ds_cards_require_action() {
        let sandbox = SandboxGateway::new();
        for (idx, number) in ["4000000000003220", "4000002500003155"].iter().enumerate() {
            let request = request_with_card(number, &format!("3ds-{}", idx));
            let result = sandbox.create_direct_payment(&request).await.unwrap();
            assert_eq!(result.status, GatewayStatus::RequiresAction);
            assert!(result.requires_3ds);
            assert!(result.three_ds_url.is_some());
        }
    }

    #[tokio::test]
    async fn declined_cards_return_table_reasons() {
        let sandbox = SandboxGateway::new();
        let cases = [
            ("4000000000000002", "Your card was declined"),
            ("4000000000009995", "Insufficient funds"),
            ("4000000000000069", "Your card has expired"),
            ("4000000000000127", "Incorrect CVC code"),
            (
                "4000000000000119",
                "An error occurred while processing your card",
            ),
        ];
        for (number, reason) in cases {
            let request = request_with_card(number, &format!("decline-{}", number));
            let err = sandbox.create_direct_payment(&request).await.unwrap_err();
            assert_eq!(
                err,
                GatewayError::Declined {
                    reason: reason.to_string()
                }
            );
        }
        assert_eq!(sandbox.charge_count(), 0, "declines never record a charge");
    }

    #[tokio::test]
    async fn declines_are_deterministic_across_attempts() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4000000000000002", "repeat-decline");
        for _ in 0..3 {
            let err = sandbox.create_direct_payment(&request).await.unwrap_err();
            assert!(matches!(err, GatewayError::Declined { .. }));
        }
    }

    #[tokio::test]
    async fn zero_cvv_declines_any_card() {
        let sandbox = SandboxGateway::new();
        let mut request = request_with_card("4242424242424242", "bad-cvv");
        request.card.as_mut().unwrap().cvv = "000".to_string();
        let err = sandbox.create_direct_payment(&request).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Declined {
                reason: "Incorrect CVV code".to_string()
            }
        );
    }

    #[tokio::test]
    async fn past_expiry_declines_any_card() {
        let sandbox = SandboxGateway::new();
        let mut request = request_with_card("4242424242424242", "old-card");
        request.card.as_mut().unwrap().expiry = "01/20".to_string();
        let err = sandbox.create_direct_payment(&request).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Declined {
                reason: "Card has expired".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_valid_card_succeeds() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4012888888881881", "unknown-card");
        let result = sandbox.create_direct_payment(&request).await.unwrap();
        assert_eq!(result.status, GatewayStatus::Succeeded);
    }

    #[tokio::test]
    async fn replayed_reference_charges_once() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4242424242424242", "same-ref");

        let first = sandbox.create_direct_payment(&request).await.unwrap();
        let second = sandbox.create_direct_payment(&request).await.unwrap();

        assert_eq!(first.payment_id, second.payment_id);
        assert_eq!(sandbox.charge_count(), 1);
    }

    #[tokio::test]
    async fn outage_budget_fails_then_recovers() {
        let sandbox = SandboxGateway::new();
        sandbox.inject_outages(2);
        let request = request_with_card("4242424242424242", "flaky");

        assert!(sandbox.create_direct_payment(&request).await.unwrap_err().is_retryable());
        assert!(sandbox.create_direct_payment(&request).await.unwrap_err().is_retryable());
        let result = sandbox.create_direct_payment(&request).await.unwrap();
        assert_eq!(result.status, GatewayStatus::Succeeded);
        assert_eq!(sandbox.charge_count(), 1);
    }

    #[tokio::test]
    async fn hosted_payment_stays_pending_with_url() {
        let sandbox = SandboxGateway::new();
        let mut request = request_with_card("4242424242424242", "hosted-1");
        request.card = None;

        let result = sandbox.create_hosted_payment(&request).await.unwrap();
        assert_eq!(result.status, GatewayStatus::Processing);
        assert_eq!(result.raw_status, "pending");
        assert!(result.payment_url.as_deref().unwrap().contains(&result.payment_id));
    }

    #[tokio::test]
    async fn three_ds_confirm_round_trip() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4000000000003220", "3ds-confirm");
        let created = sandbox.create_direct_payment(&request).await.unwrap();

        let confirmed = sandbox
            .confirm_three_ds(&created.payment_id, "authenticated")
            .await
            .unwrap();
        assert_eq!(confirmed.status, GatewayStatus::Succeeded);

        let status = sandbox.get_status(&created.payment_id).await.unwrap();
        assert_eq!(status.status, GatewayStatus::Succeeded);
    }

    #[tokio::test]
    async fn three_ds_confirm_failure() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4000002500003155", "3ds-fail");
        let created = sandbox.create_direct_payment(&request).await.unwrap();

        let failed = sandbox
            .confirm_three_ds(&created.payment_id, "failed")
            .await
            .unwrap();
        assert_eq!(failed.status, GatewayStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("3DS authentication failed"));
    }

    #[tokio::test]
    async fn refund_requires_completed_payment() {
        let sandbox = SandboxGateway::new();
        let request = request_with_card("4242424242424242", "refund-me");
        let created = sandbox.create_direct_payment(&request).await.unwrap();

        let refunded = sandbox.refund(&created.payment_id, None, None).await.unwrap();
        assert_eq!(refunded.raw_status, "refunded");

        let again = sandbox.refund(&created.payment_id, None, None).await;
        assert!(matches!(again, Err(GatewayError::Declined { .. })));
    }

    #[tokio::test]
    async fn unknown_payment_is_a_protocol_error() {
        let sandbox = SandboxGateway::new();
        let err = sandbox.get_status("sb_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Protocol { .. }));
    }
}
