//! 3DS challenge confirmation.
//!
//! A challenged transaction sits in REQUIRES_ACTION until the customer
//! comes back from the issuer page (or the challenge times out). The
//! coordinator owns that handoff: it checks the TTL, asks the gateway
//! for the authentication verdict and drives the transaction to its
//! terminal state.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ThreeDsStatus, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::gateway::{with_retry, Gateway, RetryPolicy};
use crate::store::{PaymentStore, StoreError};

use super::payments::apply_gateway_result;
use super::MAX_WRITE_ATTEMPTS;

pub struct ThreeDsCoordinator {
    store: Arc<dyn PaymentStore>,
    gateway: Gateway,
    retry: RetryPolicy,
    ttl: Duration,
}

impl ThreeDsCoordinator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Gateway,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
            ttl,
        }
    }

    /// Confirms the challenge outcome with the gateway and settles the
    /// transaction into SUCCEEDED or FAILED.
    pub async fn confirm(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
        result: &str,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .store
            .transaction(transaction_id)
            .await?
            .filter(|tx| tx.merchant_id == merchant_id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;

        let now = Utc::now();
        if tx.three_ds_expired(now, self.ttl) {
            return self.expire(tx).await;
        }
        if tx.three_ds_status != ThreeDsStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "transaction has no pending 3DS challenge (status {})",
                tx.status
            )));
        }
        let payment_id = tx.gateway_payment_id.clone().ok_or_else(|| {
            AppError::Internal(
                "challenged transaction is missing its gateway reference".to_string(),
            )
        })?;

        let gateway_result = with_retry(&self.retry, "confirm_three_ds", || {
            self.gateway.confirm_three_ds(&payment_id, result)
        })
        .await?;

        let mut current = tx;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let now = Utc::now();
            apply_gateway_result(&mut current, &gateway_result, now)?;
            match self.store.update_transaction(&current).await {
                Ok(updated) => {
                    tracing::info!(
                        transaction_id = %updated.id,
                        status = %updated.status,
                        "3DS challenge resolved"
                    );
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
                    if current.status != TransactionStatus::RequiresAction {
                        // A webhook beat us to it.
                        tracing::info!(
                            transaction_id = %current.id,
                            status = %current.status,
                            "3DS challenge was resolved concurrently"
                        );
                        return Ok(current);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::Internal(
            "3DS confirmation kept losing version races".to_string(),
        ))
    }

    /// Marks an overdue challenge failed. The write is best effort: a
    /// lost race means someone else already moved the transaction.
    async fn expire(&self, mut tx: Transaction) -> Result<Transaction, AppError> {
        let now = Utc::now();
        tx.three_ds_status = ThreeDsStatus::Failed;
        tx.fail("3DS authentication expired", now)?;
        match self.store.update_transaction(&tx).await {
            Ok(_) | Err(StoreError::VersionConflict { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        Err(AppError::InvalidState(
            "3DS challenge has expired".to_string(),
        ))
    }
}
