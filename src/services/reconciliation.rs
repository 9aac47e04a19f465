//! Reconciliation sweep: the safety net under webhooks.
//!
//! Deliveries get lost and processes die between the gateway call and
//! the local write. The sweep finds transactions that have sat in
//! PENDING or PROCESSING too long, asks the gateway what actually
//! happened, and applies the answer. Challenges nobody completed are
//! failed once their TTL runs out. Rows with no gateway reference
//! cannot be polled and are alerted on instead.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::domain::{ThreeDsStatus, Transaction};
use crate::error::AppError;
use crate::gateway::{with_retry, Gateway, RetryPolicy};
use crate::store::{PaymentStore, StoreError};

use super::payments::apply_gateway_result;

const BATCH_LIMIT: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Stuck transactions looked at this sweep.
    pub examined: usize,
    /// Transactions whose status changed after polling the gateway.
    pub updated: usize,
    /// 3DS challenges failed for running out their TTL.
    pub expired: usize,
    /// Transactions that cannot self-heal and need an operator.
    pub alerts: usize,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.examined == 0 && self.expired == 0
    }
}

pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    gateway: Gateway,
    retry: RetryPolicy,
    stuck_after: Duration,
    three_ds_ttl: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Gateway,
        retry: RetryPolicy,
        stuck_after: Duration,
        three_ds_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
            stuck_after,
            three_ds_ttl,
        }
    }

    /// One full sweep. Per-transaction failures are logged and skipped;
    /// the sweep itself only fails when the store does.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileSummary, AppError> {
        let mut summary = ReconcileSummary::default();

        let cutoff = now - self.stuck_after;
        let stuck = self.store.stuck_in_flight(cutoff, BATCH_LIMIT).await?;
        for tx in stuck {
            summary.examined += 1;
            if tx.gateway_payment_id.is_some() {
                if self.poll_and_apply(tx, now).await? {
                    summary.updated += 1;
                }
            } else {
                summary.alerts += 1;
                tracing::error!(
                    target: "reconciliation",
                    transaction_id = %tx.id,
                    status = %tx.status,
                    age_secs = (now - tx.updated_at).num_seconds(),
                    "transaction stuck with no gateway reference, operator attention required"
                );
            }
        }

        let issued_before = now - self.three_ds_ttl;
        let overdue = self
            .store
            .expired_challenges(issued_before, BATCH_LIMIT)
            .await?;
        for tx in overdue {
            if self.expire_challenge(tx, now).await? {
                summary.expired += 1;
            }
        }

        Ok(summary)
    }

    /// Asks the gateway for the authoritative status and applies it.
    /// Returns whether the transaction changed state. The row is
    /// written even on no change so its `updated_at` leaves the stuck
    /// window until the next cutoff passes.
    async fn poll_and_apply(
        &self,
        mut tx: Transaction,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let payment_id = match tx.gateway_payment_id.clone() {
            Some(payment_id) => payment_id,
            None => return Ok(false),
        };
        let result = match with_retry(&self.retry, "reconcile_status", || {
            self.gateway.get_status(&payment_id)
        })
        .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    error = %err,
                    "reconciliation poll failed, will retry next sweep"
                );
                return Ok(false);
            }
        };

        let before = tx.status;
        if let Err(err) = apply_gateway_result(&mut tx, &result, now) {
            tracing::warn!(
                transaction_id = %tx.id,
                raw_status = %result.raw_status,
                error = %err,
                "gateway status does not apply to the stored state, skipping"
            );
            return Ok(false);
        }
        tx.updated_at = now;

        match self.store.update_transaction(&tx).await {
            Ok(updated) => {
                if updated.status != before {
                    tracing::info!(
                        transaction_id = %updated.id,
                        from = %before,
                        to = %updated.status,
                        "reconciliation resolved a stuck transaction"
                    );
                }
                Ok(updated.status != before)
            }
            Err(StoreError::VersionConflict { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn expire_challenge(
        &self,
        mut tx: Transaction,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        tx.three_ds_status = ThreeDsStatus::Failed;
        if let Err(err) = tx.fail("3DS authentication expired", now) {
            tracing::warn!(
                transaction_id = %tx.id,
                status = %tx.status,
                error = %err,
                "overdue challenge no longer failable, skipping"
            );
            return Ok(false);
        }
        match self.store.update_transaction(&tx).await {
            Ok(updated) => {
                tracing::info!(
                    transaction_id = %updated.id,
                    "expired an abandoned 3DS challenge"
                );
                Ok(true)
            }
            Err(StoreError::VersionConflict { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Long-running sweep loop, spawned next to the server.
pub async fn run_reconciliation(reconciler: Arc<Reconciler>, interval: std::time::Duration) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "reconciliation loop started"
    );
    loop {
        match reconciler.run_once(Utc::now()).await {
            Ok(summary) => {
                if !summary.is_empty() {
                    tracing::info!(
                        examined = summary.examined,
                        updated = summary.updated,
                        expired = summary.expired,
                        alerts = summary.alerts,
                        "reconciliation sweep finished"
                    );
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "reconciliation sweep failed");
            }
        }
        tokio::time::sleep(interval).await;
    }
}
