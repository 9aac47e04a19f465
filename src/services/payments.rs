//! Payment orchestration: the write path for every transaction.
//!
//! All lifecycle mutations flow through here so the ordering rules live
//! in one place: validate, screen, price, persist, charge, then drive
//! the state machine off the gateway's answer. Webhooks and refunds
//! re-read and retry on version conflicts instead of locking.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    FraudStatus, NewTransaction, PaymentMethod, ThreeDsStatus, Transaction, TransactionStatus,
};
use crate::error::AppError;
use crate::fees::{FeeCalculator, FeeScheduleProvider};
use crate::fraud::{ChargeContext, FraudAssessment, FraudScorer};
use crate::gateway::{
    with_retry, CardDetails, ChargeRequest, Gateway, GatewayError, GatewayResult, GatewayStatus,
    RetryPolicy,
};
use crate::merchants::{MerchantDirectory, MerchantProfile};
use crate::sanitize::mask_pan;
use crate::store::{PaymentStore, StoreError};
use crate::validation;
use crate::webhook::GatewayEvent;

use super::threeds::ThreeDsCoordinator;
use super::MAX_WRITE_ATTEMPTS;

const FRAUD_BLOCK_REASON: &str = "Transaction blocked by fraud screening";

/// Knobs shared by the payment service and its 3DS coordinator.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub retry: RetryPolicy,
    pub three_ds_ttl: Duration,
    /// Public base URL of this platform; used to derive the webhook and
    /// 3DS return URLs handed to the gateway.
    pub app_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            three_ds_ttl: Duration::minutes(15),
            app_url: None,
        }
    }
}

#[derive(Clone)]
pub struct DirectChargeInput {
    pub merchant_id: Uuid,
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
    pub cardholder_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
}

impl fmt::Debug for DirectChargeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectChargeInput")
            .field("merchant_id", &self.merchant_id)
            .field("external_id", &self.external_id)
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .field("card_number", &mask_pan(&self.card_number))
            .field("customer_email", &self.customer_email)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HostedChargeInput {
    pub merchant_id: Uuid,
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
}

/// A hosted charge plus the redirect the customer completes payment on.
/// The URL is absent only when an idempotent replay hits a transaction
/// whose checkout session the gateway no longer reports.
#[derive(Debug, Clone)]
pub struct HostedCharge {
    pub transaction: Transaction,
    pub payment_url: Option<String>,
}

/// What became of a verified webhook delivery.
#[derive(Debug)]
pub enum WebhookOutcome {
    Applied(Transaction),
    Ignored(&'static str),
}

pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    gateway: Gateway,
    merchants: Arc<dyn MerchantDirectory>,
    fraud: Arc<dyn FraudScorer>,
    fees: Arc<dyn FeeScheduleProvider>,
    three_ds: ThreeDsCoordinator,
    retry: RetryPolicy,
    three_ds_ttl: Duration,
    webhook_url: Option<String>,
    return_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Gateway,
        merchants: Arc<dyn MerchantDirectory>,
        fraud: Arc<dyn FraudScorer>,
        fees: Arc<dyn FeeScheduleProvider>,
        config: ServiceConfig,
    ) -> Self {
        let base = config
            .app_url
            .map(|url| url.trim_end_matches('/').to_string());
        let three_ds = ThreeDsCoordinator::new(
            Arc::clone(&store),
            gateway.clone(),
            config.retry,
            config.three_ds_ttl,
        );
        Self {
            store,
            gateway,
            merchants,
            fraud,
            fees,
            three_ds,
            retry: config.retry,
            three_ds_ttl: config.three_ds_ttl,
            webhook_url: base.as_ref().map(|b| format!("{}/webhooks/circoflows", b)),
            return_url: base.map(|b| format!("{}/payments/3ds-return", b)),
        }
    }

    /// Card-present charge: the card details pass through to the gateway
    /// and are never persisted.
    pub async fn create_direct_payment(
        &self,
        input: DirectChargeInput,
    ) -> Result<Transaction, AppError> {
        let merchant = self.resolve_merchant(input.merchant_id).await?;
        if let Some(existing) = self
            .find_existing(merchant.id, input.external_id.as_deref())
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        validation::validate_amount(&input.amount, &input.currency)?;
        if let Some(external_id) = &input.external_id {
            validation::validate_max_len("external_id", external_id, validation::EXTERNAL_ID_MAX_LEN)?;
        }
        let card_number = validation::normalize_card_number(&input.card_number);
        validation::validate_card_number(&card_number)?;
        validation::validate_expiry(&input.expiry, now)?;
        validation::validate_cvv(&input.cvv)?;
        if let Some(email) = &input.customer_email {
            validation::validate_customer_email(email)?;
        }
        if let Some(name) = &input.customer_name {
            validation::validate_max_len("customer_name", name, validation::CUSTOMER_NAME_MAX_LEN)?;
        }

        let assessment = self
            .fraud
            .assess(&ChargeContext {
                merchant_id: merchant.id,
                amount: &input.amount,
                currency: &input.currency,
                customer_email: input.customer_email.as_deref(),
                card_number: Some(&card_number),
            })
            .await;
        if assessment.status == FraudStatus::Blocked {
            self.record_blocked_charge(&merchant, &input.external_id, &input.amount, &input.currency, &input.customer_email, &input.customer_name, assessment)
                .await?;
            return Err(AppError::GatewayDeclined(FRAUD_BLOCK_REASON.to_string()));
        }

        let tx = match self
            .price_and_persist(&merchant, &input.external_id, &input.amount, &input.currency, &input.customer_email, &input.customer_name, assessment)
            .await?
        {
            Persisted::Fresh(tx) => tx,
            Persisted::Existing(tx) => return Ok(tx),
        };

        let request = ChargeRequest {
            merchant_reference: tx.id.to_string(),
            amount: input.amount.clone(),
            currency: input.currency.clone(),
            card: Some(CardDetails {
                number: card_number,
                expiry: input.expiry.clone(),
                cvv: input.cvv.clone(),
                holder_name: input.cardholder_name.clone(),
            }),
            customer_email: input.customer_email.clone(),
            customer_name: input.customer_name.clone(),
            return_url: self.return_url.clone(),
            webhook_url: self.webhook_url.clone(),
        };
        let outcome = with_retry(&self.retry, "create_direct_payment", || {
            self.gateway.create_direct_payment(&request)
        })
        .await;

        self.finish_charge(tx, outcome).await
    }

    /// Hosted checkout: no card data touches this platform; the
    /// customer pays on the gateway's page and webhooks finish the job.
    pub async fn create_hosted_payment(
        &self,
        input: HostedChargeInput,
    ) -> Result<HostedCharge, AppError> {
        let merchant = self.resolve_merchant(input.merchant_id).await?;
        if let Some(existing) = self
            .find_existing(merchant.id, input.external_id.as_deref())
            .await?
        {
            let payment_url = self.replay_payment_url(&existing).await;
            return Ok(HostedCharge {
                transaction: existing,
                payment_url,
            });
        }

        validation::validate_amount(&input.amount, &input.currency)?;
        if let Some(external_id) = &input.external_id {
            validation::validate_max_len("external_id", external_id, validation::EXTERNAL_ID_MAX_LEN)?;
        }
        if let Some(email) = &input.customer_email {
            validation::validate_customer_email(email)?;
        }

        let assessment = self
            .fraud
            .assess(&ChargeContext {
                merchant_id: merchant.id,
                amount: &input.amount,
                currency: &input.currency,
                customer_email: input.customer_email.as_deref(),
                card_number: None,
            })
            .await;
        if assessment.status == FraudStatus::Blocked {
            self.record_blocked_charge(&merchant, &input.external_id, &input.amount, &input.currency, &input.customer_email, &input.customer_name, assessment)
                .await?;
            return Err(AppError::GatewayDeclined(FRAUD_BLOCK_REASON.to_string()));
        }

        let tx = match self
            .price_and_persist(&merchant, &input.external_id, &input.amount, &input.currency, &input.customer_email, &input.customer_name, assessment)
            .await?
        {
            Persisted::Fresh(tx) => tx,
            Persisted::Existing(tx) => {
                let payment_url = self.replay_payment_url(&tx).await;
                return Ok(HostedCharge {
                    transaction: tx,
                    payment_url,
                });
            }
        };

        let request = ChargeRequest {
            merchant_reference: tx.id.to_string(),
            amount: input.amount.clone(),
            currency: input.currency.clone(),
            card: None,
            customer_email: input.customer_email.clone(),
            customer_name: input.customer_name.clone(),
            return_url: self.return_url.clone(),
            webhook_url: self.webhook_url.clone(),
        };
        let outcome = with_retry(&self.retry, "create_hosted_payment", || {
            self.gateway.create_hosted_payment(&request)
        })
        .await;

        let payment_url = match &outcome {
            Ok(result) => result.payment_url.clone(),
            Err(_) => None,
        };
        let transaction = self.finish_charge(tx, outcome).await?;
        let payment_url = payment_url.ok_or_else(|| {
            AppError::GatewayUnavailable(
                "hosted payment response carried no payment_url".to_string(),
            )
        })?;

        Ok(HostedCharge {
            transaction,
            payment_url: Some(payment_url),
        })
    }

    pub async fn confirm_three_ds(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
        result: &str,
    ) -> Result<Transaction, AppError> {
        self.three_ds.confirm(merchant_id, transaction_id, result).await
    }

    /// Applies a verified gateway event. Idempotent: replays and events
    /// that cannot apply to the current state are ignored, never errors.
    pub async fn handle_webhook_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<WebhookOutcome, AppError> {
        let kind = match event.kind() {
            Some(kind) => kind,
            None => {
                tracing::warn!(event = %event.event, "ignoring unknown webhook event kind");
                return Ok(WebhookOutcome::Ignored("unknown event kind"));
            }
        };
        if event.payment_id.is_empty() {
            tracing::warn!(event = %event.event, "webhook event carries no payment id");
            return Ok(WebhookOutcome::Ignored("missing payment id"));
        }

        let target = kind.target_status();
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut tx = match self
                .store
                .transaction_by_gateway_id(&event.payment_id)
                .await?
            {
                Some(tx) => tx,
                None => {
                    tracing::warn!(
                        payment_id = %event.payment_id,
                        event = %event.event,
                        "webhook references an unknown payment"
                    );
                    return Ok(WebhookOutcome::Ignored("unknown payment id"));
                }
            };

            if tx.status == target {
                return Ok(WebhookOutcome::Ignored("event already applied"));
            }

            let now = Utc::now();
            // A capture can land before we ever saw the charge accepted.
            if tx.status == TransactionStatus::Pending && target == TransactionStatus::Succeeded {
                tx.transition(TransactionStatus::Processing, now)?;
            }
            if !tx.status.can_transition(target) {
                tracing::warn!(
                    transaction_id = %tx.id,
                    current = %tx.status,
                    event = %event.event,
                    "ignoring webhook event that cannot apply to the current state"
                );
                return Ok(WebhookOutcome::Ignored("event does not apply to current state"));
            }

            if let Some(raw) = &event.status {
                tx.record_gateway_status(raw.as_str());
            }
            if target == TransactionStatus::Failed {
                let reason = event
                    .failure_reason
                    .clone()
                    .or_else(|| event.status.clone())
                    .unwrap_or_else(|| "Payment failed".to_string());
                tx.fail(reason, now)?;
                if tx.three_ds_status == ThreeDsStatus::Pending {
                    tx.three_ds_status = ThreeDsStatus::Failed;
                }
            } else {
                tx.transition(target, now)?;
                if target == TransactionStatus::Succeeded
                    && tx.three_ds_status == ThreeDsStatus::Pending
                {
                    tx.three_ds_status = ThreeDsStatus::Confirmed;
                }
            }

            match self.store.update_transaction(&tx).await {
                Ok(updated) => {
                    tracing::info!(
                        transaction_id = %updated.id,
                        status = %updated.status,
                        event = %event.event,
                        "webhook event applied"
                    );
                    return Ok(WebhookOutcome::Applied(updated));
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::Internal(
            "webhook apply kept losing version races".to_string(),
        ))
    }

    /// Full or partial refund of a succeeded transaction. Either way the
    /// transaction moves to REFUNDED; an already-settled one stays in
    /// its batch.
    pub async fn refund(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
        amount: Option<BigDecimal>,
        reason: Option<String>,
    ) -> Result<Transaction, AppError> {
        let tx = self.fetch_for_merchant(merchant_id, transaction_id).await?;
        if tx.status != TransactionStatus::Succeeded {
            return Err(AppError::InvalidState(format!(
                "only succeeded transactions can be refunded, current status is {}",
                tx.status
            )));
        }
        if let Some(amount) = &amount {
            if amount <= &BigDecimal::from(0) || amount > &tx.amount {
                return Err(AppError::Validation(
                    "refund amount must be positive and at most the transaction amount".to_string(),
                ));
            }
        }
        let payment_id = tx.gateway_payment_id.clone().ok_or_else(|| {
            AppError::Internal("succeeded transaction is missing its gateway reference".to_string())
        })?;

        // Gateway first: if the refund does not land upstream the
        // transaction stays SUCCEEDED and the call can be repeated.
        let result = with_retry(&self.retry, "refund", || {
            self.gateway
                .refund(&payment_id, amount.as_ref(), reason.as_deref())
        })
        .await?;

        let mut current = tx;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let now = Utc::now();
            current.record_gateway_status(result.raw_status.as_str());
            current.transition(TransactionStatus::Refunded, now)?;
            match self.store.update_transaction(&current).await {
                Ok(updated) => {
                    tracing::info!(transaction_id = %updated.id, "transaction refunded");
                    return Ok(updated);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    current = self
                        .store
                        .transaction(transaction_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("transaction {}", transaction_id))
                        })?;
                    if current.status == TransactionStatus::Refunded {
                        return Ok(current);
                    }
                    if current.status != TransactionStatus::Succeeded {
                        return Err(AppError::InvalidState(format!(
                            "transaction moved to {} during refund",
                            current.status
                        )));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::Internal(
            "refund kept losing version races".to_string(),
        ))
    }

    /// Local cancellation of an in-flight transaction. No gateway void:
    /// nothing was captured yet for PENDING/PROCESSING charges.
    pub async fn cancel(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.fetch_for_merchant(merchant_id, transaction_id).await?;
        if !matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Processing
        ) {
            return Err(AppError::InvalidState(format!(
                "cannot cancel a transaction in {}",
                tx.status
            )));
        }
        let now = Utc::now();
        tx.transition(TransactionStatus::Cancelled, now)?;
        match self.store.update_transaction(&tx).await {
            Ok(updated) => Ok(updated),
            Err(StoreError::VersionConflict { .. }) => Err(AppError::InvalidState(
                "transaction changed state during cancel".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_payment(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.fetch_for_merchant(merchant_id, transaction_id).await?;
        tx.three_ds_status = tx.effective_three_ds_status(Utc::now(), self.three_ds_ttl);
        Ok(tx)
    }

    pub async fn list_payments(
        &self,
        merchant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let now = Utc::now();
        let mut rows = self
            .store
            .list_transactions(Some(merchant_id), limit, offset)
            .await?;
        for tx in &mut rows {
            tx.three_ds_status = tx.effective_three_ds_status(now, self.three_ds_ttl);
        }
        Ok(rows)
    }

    async fn resolve_merchant(&self, merchant_id: Uuid) -> Result<MerchantProfile, AppError> {
        let merchant = self
            .merchants
            .merchant(merchant_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("merchant {}", merchant_id)))?;
        if !merchant.active {
            return Err(AppError::Validation("merchant is not active".to_string()));
        }
        Ok(merchant)
    }

    async fn find_existing(
        &self,
        merchant_id: Uuid,
        external_id: Option<&str>,
    ) -> Result<Option<Transaction>, AppError> {
        match external_id {
            Some(external_id) => Ok(self
                .store
                .transaction_by_external_id(merchant_id, external_id)
                .await?),
            None => Ok(None),
        }
    }

    /// Computes fees and inserts the PENDING row. A duplicate-key race
    /// on the merchant reference resolves to the transaction that won.
    #[allow(clippy::too_many_arguments)]
    async fn price_and_persist(
        &self,
        merchant: &MerchantProfile,
        external_id: &Option<String>,
        amount: &BigDecimal,
        currency: &str,
        customer_email: &Option<String>,
        customer_name: &Option<String>,
        assessment: FraudAssessment,
    ) -> Result<Persisted, AppError> {
        let schedule = self.fees.current_schedule().await;
        let breakdown = FeeCalculator::compute(amount, currency, &schedule, merchant.fee_tier)?;

        let tx = Transaction::new(NewTransaction {
            merchant_id: merchant.id,
            super_merchant_id: Some(merchant.super_merchant_id),
            external_id: external_id.clone(),
            amount: amount.clone(),
            currency: currency.to_string(),
            payment_method: PaymentMethod::Card,
            merchant_fee: breakdown.merchant_fee,
            super_merchant_fee: breakdown.super_merchant_fee,
            gateway_fee: breakdown.gateway_fee,
            net_amount: breakdown.net_amount,
            customer_email: customer_email.clone(),
            customer_name: customer_name.clone(),
            fraud_score: Some(assessment.score),
            fraud_status: Some(assessment.status),
        });
        if let Err(err) = self.store.insert_transaction(&tx).await {
            if err.is_duplicate() {
                if let Some(external_id) = external_id.as_deref() {
                    if let Some(existing) = self
                        .store
                        .transaction_by_external_id(merchant.id, external_id)
                        .await?
                    {
                        return Ok(Persisted::Existing(existing));
                    }
                }
            }
            return Err(err.into());
        }
        Ok(Persisted::Fresh(tx))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_blocked_charge(
        &self,
        merchant: &MerchantProfile,
        external_id: &Option<String>,
        amount: &BigDecimal,
        currency: &str,
        customer_email: &Option<String>,
        customer_name: &Option<String>,
        assessment: FraudAssessment,
    ) -> Result<(), AppError> {
        let zero = BigDecimal::from(0);
        let mut tx = Transaction::new(NewTransaction {
            merchant_id: merchant.id,
            super_merchant_id: Some(merchant.super_merchant_id),
            external_id: external_id.clone(),
            amount: amount.clone(),
            currency: currency.to_string(),
            payment_method: PaymentMethod::Card,
            merchant_fee: zero.clone(),
            super_merchant_fee: zero.clone(),
            gateway_fee: zero.clone(),
            net_amount: zero,
            customer_email: customer_email.clone(),
            customer_name: customer_name.clone(),
            fraud_score: Some(assessment.score),
            fraud_status: Some(assessment.status),
        });
        tx.fail(FRAUD_BLOCK_REASON, Utc::now())?;
        self.store.insert_transaction(&tx).await?;
        tracing::warn!(
            transaction_id = %tx.id,
            merchant_id = %merchant.id,
            score = assessment.score,
            "charge blocked by fraud screening"
        );
        Ok(())
    }

    /// Drives the persisted PENDING transaction off the gateway outcome
    /// and writes the result back.
    async fn finish_charge(
        &self,
        mut tx: Transaction,
        outcome: Result<GatewayResult, GatewayError>,
    ) -> Result<Transaction, AppError> {
        let now = Utc::now();
        match outcome {
            Ok(result) => {
                apply_gateway_result(&mut tx, &result, now)?;
                match self.store.update_transaction(&tx).await {
                    Ok(updated) => Ok(updated),
                    Err(err) => {
                        // Money may have moved upstream without a local record.
                        tracing::error!(
                            target: "reconciliation",
                            transaction_id = %tx.id,
                            gateway_payment_id = tx.gateway_payment_id.as_deref().unwrap_or(""),
                            error = %err,
                            "charge accepted upstream but local state failed to persist"
                        );
                        Err(err.into())
                    }
                }
            }
            Err(err) => {
                let reason = match &err {
                    GatewayError::Declined { reason } => reason.clone(),
                    GatewayError::Unavailable { reason } => {
                        format!("Payment gateway unavailable: {}", reason)
                    }
                    GatewayError::Protocol { reason } => {
                        format!("Malformed gateway response: {}", reason)
                    }
                };
                tx.fail(reason, now)?;
                if let Err(persist_err) = self.store.update_transaction(&tx).await {
                    tracing::error!(
                        target: "reconciliation",
                        transaction_id = %tx.id,
                        error = %persist_err,
                        "failed to record charge failure"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Best-effort recovery of the checkout URL for a replayed hosted
    /// create.
    async fn replay_payment_url(&self, tx: &Transaction) -> Option<String> {
        let payment_id = tx.gateway_payment_id.as_deref()?;
        match self.gateway.get_status(payment_id).await {
            Ok(result) => result.payment_url,
            Err(err) => {
                tracing::debug!(
                    transaction_id = %tx.id,
                    error = %err,
                    "could not recover payment_url for replayed hosted charge"
                );
                None
            }
        }
    }

    async fn fetch_for_merchant(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .store
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;
        if tx.merchant_id != merchant_id {
            // never reveal other merchants' transactions
            return Err(AppError::NotFound(format!(
                "transaction {}",
                transaction_id
            )));
        }
        Ok(tx)
    }
}

enum Persisted {
    Fresh(Transaction),
    Existing(Transaction),
}

/// Maps a normalized gateway answer onto the transaction. Shared by the
/// initial charge, 3DS confirmation, and reconciliation polling.
pub(crate) fn apply_gateway_result(
    tx: &mut Transaction,
    result: &GatewayResult,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if !result.payment_id.is_empty() {
        tx.record_gateway_reference(result.payment_id.as_str());
    }
    tx.record_gateway_status(result.raw_status.as_str());
    if tx.status == TransactionStatus::Pending {
        tx.transition(TransactionStatus::Processing, now)?;
    }

    match result.status {
        GatewayStatus::Succeeded => {
            if tx.status != TransactionStatus::Succeeded {
                tx.transition(TransactionStatus::Succeeded, now)?;
            }
            if tx.three_ds_status == ThreeDsStatus::Pending {
                tx.three_ds_status = ThreeDsStatus::Confirmed;
            }
        }
        GatewayStatus::RequiresAction => {
            if tx.status == TransactionStatus::Processing {
                tx.transition(TransactionStatus::RequiresAction, now)?;
                tx.open_three_ds_challenge(result.three_ds_url.clone(), now);
            }
        }
        GatewayStatus::Failed => {
            if tx.three_ds_status == ThreeDsStatus::Pending {
                tx.three_ds_status = ThreeDsStatus::Failed;
            }
            let reason = result
                .failure_reason
                .clone()
                .unwrap_or_else(|| "Payment failed".to_string());
            tx.fail(reason, now)?;
        }
        GatewayStatus::Processing => {}
        GatewayStatus::Other => {
            tracing::warn!(
                transaction_id = %tx.id,
                raw_status = %result.raw_status,
                "unrecognized gateway status, leaving transaction in flight"
            );
        }
    }
    Ok(())
}
