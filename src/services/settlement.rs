//! Settlement runs: closing payout batches over daily windows.
//!
//! The aggregator is a thin policy layer over the store, which does the
//! heavy lifting (window locking, candidate selection, marking) in one
//! transaction. A scheduled run walks every active merchant and then
//! every active super-merchant, closing yesterday's window for each.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{InvalidAdvance, Payee, SettlementBatch, SettlementStatus};
use crate::error::AppError;
use crate::merchants::MerchantDirectory;
use crate::store::{PaymentStore, StoreError};

pub struct SettlementAggregator {
    store: Arc<dyn PaymentStore>,
    merchants: Arc<dyn MerchantDirectory>,
}

impl SettlementAggregator {
    pub fn new(store: Arc<dyn PaymentStore>, merchants: Arc<dyn MerchantDirectory>) -> Self {
        Self { store, merchants }
    }

    /// Closes one payout window for one payee. `Ok(None)` means the
    /// window held no candidate transactions and no batch was created.
    pub async fn close_batch(
        &self,
        payee: Payee,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementBatch>, AppError> {
        if period_start >= period_end {
            return Err(AppError::Validation(
                "period_start must precede period_end".to_string(),
            ));
        }
        if period_end > now {
            return Err(AppError::Validation(
                "period_end must not be in the future".to_string(),
            ));
        }
        match self
            .store
            .close_settlement(payee, period_start, period_end, now)
            .await
        {
            Ok(batch) => Ok(batch),
            Err(StoreError::Conflict(reason)) => Err(AppError::InvalidState(reason)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn batch(&self, id: Uuid) -> Result<SettlementBatch, AppError> {
        self.store
            .settlement(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("settlement {}", id)))
    }

    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SettlementBatch>, AppError> {
        Ok(self.store.list_settlements(limit, offset).await?)
    }

    /// Moves a batch along PENDING -> PROCESSING -> COMPLETED | FAILED.
    pub async fn advance(
        &self,
        id: Uuid,
        to: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<SettlementBatch, AppError> {
        let batch = self.batch(id).await?;
        if !batch.status.can_advance(to) {
            return Err(InvalidAdvance {
                from: batch.status,
                to,
            }
            .into());
        }
        match self
            .store
            .advance_settlement(id, batch.status, to, now)
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    settlement_id = %updated.id,
                    status = %updated.status,
                    "settlement advanced"
                );
                Ok(updated)
            }
            Err(StoreError::VersionConflict { .. }) => Err(AppError::InvalidState(
                "settlement was advanced concurrently".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Closes yesterday's UTC window for every active payee.
    pub async fn run_daily_settlements(&self, now: DateTime<Utc>) -> Vec<SettlementBatch> {
        let period_end = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        let period_start = period_end - Duration::days(1);
        self.run_window(period_start, period_end, now).await
    }

    /// Closes one window for every active payee. Per-payee failures are
    /// logged and skipped so one bad payee cannot stall the rest of the
    /// run.
    pub async fn run_window(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<SettlementBatch> {
        let mut payees: Vec<Payee> = Vec::new();
        for merchant in self.merchants.active_merchants().await {
            payees.push(Payee::merchant(merchant.id));
        }
        for super_merchant in self.merchants.active_super_merchants().await {
            payees.push(Payee::super_merchant(super_merchant.id));
        }

        let mut closed = Vec::new();
        for payee in payees {
            match self
                .close_batch(payee, period_start, period_end, now)
                .await
            {
                Ok(Some(batch)) => {
                    tracing::info!(
                        settlement_id = %batch.id,
                        payee = %payee,
                        transaction_count = batch.transaction_count,
                        net_amount = %batch.net_amount,
                        "settlement batch closed"
                    );
                    closed.push(batch);
                }
                Ok(None) => {
                    tracing::info!(payee = %payee, "no transactions to settle");
                }
                Err(AppError::InvalidState(reason)) => {
                    tracing::info!(
                        payee = %payee,
                        reason = %reason,
                        "settlement window already closed, skipping"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        payee = %payee,
                        error = %err,
                        "failed to close settlement batch"
                    );
                }
            }
        }
        closed
    }
}

/// Long-running scheduler: sleeps until the next cron firing, runs the
/// daily settlement pass, repeats.
pub async fn run_settlement_scheduler(
    aggregator: Arc<SettlementAggregator>,
    schedule: cron::Schedule,
) {
    tracing::info!(schedule = %schedule, "settlement scheduler started");
    loop {
        let next = match schedule.upcoming(Utc).next() {
            Some(next) => next,
            None => {
                tracing::error!("settlement schedule has no future firings, scheduler stopping");
                return;
            }
        };
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tracing::info!(next_run = %next, "settlement run scheduled");
        tokio::time::sleep(wait).await;

        let batches = aggregator.run_daily_settlements(Utc::now()).await;
        if batches.is_empty() {
            tracing::info!("settlement run closed no batches");
        } else {
            tracing::info!(count = batches.len(), "settlement run finished");
        }
    }
}
