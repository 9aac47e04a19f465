//! In-memory [`PaymentStore`] used by tests and the sandbox CLI.
//!
//! A single mutex over both maps gives every operation the same
//! atomicity the Postgres implementation gets from its transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PaymentStore, StoreError, StoreResult};
use crate::domain::{
    Payee, PayeeKind, SettlementBatch, SettlementStatus, Transaction, TransactionStatus,
};

#[derive(Default)]
struct Inner {
    transactions: HashMap<Uuid, Transaction>,
    settlements: HashMap<Uuid, SettlementBatch>,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    inner: Mutex<Inner>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_window(
    tx: &Transaction,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> bool {
    match tx.processed_at {
        Some(processed) => processed >= period_start && processed < period_end,
        None => false,
    }
}

fn is_candidate(tx: &Transaction, payee: &Payee) -> bool {
    if tx.status != TransactionStatus::Succeeded {
        return false;
    }
    match payee.kind {
        PayeeKind::Merchant => tx.merchant_id == payee.id && tx.settlement_id.is_none(),
        PayeeKind::SuperMerchant => {
            tx.super_merchant_id == Some(payee.id) && tx.commission_settlement_id.is_none()
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.transactions.contains_key(&tx.id) {
            return Err(StoreError::Duplicate {
                constraint: "transactions_pkey".to_string(),
            });
        }
        if let Some(external_id) = &tx.external_id {
            let taken = inner
                .transactions
                .values()
                .any(|t| t.merchant_id == tx.merchant_id && t.external_id.as_ref() == Some(external_id));
            if taken {
                return Err(StoreError::Duplicate {
                    constraint: "transactions_merchant_external_key".to_string(),
                });
            }
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner.transactions.get(&id).cloned())
    }

    async fn transaction_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .find(|t| t.gateway_payment_id.as_deref() == Some(gateway_payment_id))
            .cloned())
    }

    async fn transaction_by_external_id(
        &self,
        merchant_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .find(|t| t.merchant_id == merchant_id && t.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn update_transaction(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let mut inner = self.inner.lock().await;
        if let Some(gateway_id) = &tx.gateway_payment_id {
            let taken = inner
                .transactions
                .values()
                .any(|t| t.id != tx.id && t.gateway_payment_id.as_ref() == Some(gateway_id));
            if taken {
                return Err(StoreError::Duplicate {
                    constraint: "transactions_gateway_payment_key".to_string(),
                });
            }
        }
        let stored = match inner.transactions.get_mut(&tx.id) {
            Some(stored) => stored,
            None => return Err(StoreError::VersionConflict { id: tx.id }),
        };
        if stored.version != tx.version {
            return Err(StoreError::VersionConflict { id: tx.id });
        }
        let mut next = tx.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_transactions(
        &self,
        merchant_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| merchant_id.map(|m| t.merchant_id == m).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn stuck_in_flight(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransactionStatus::Pending | TransactionStatus::Processing
                ) && t.updated_at < cutoff
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn expired_challenges(
        &self,
        issued_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::RequiresAction
                    && t.three_ds_issued_at.map(|at| at < issued_before).unwrap_or(false)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.three_ds_issued_at.cmp(&b.three_ds_issued_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn close_settlement(
        &self,
        payee: Payee,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SettlementBatch>> {
        let mut inner = self.inner.lock().await;

        let latest_end = inner
            .settlements
            .values()
            .filter(|s| s.payee == payee)
            .map(|s| s.period_end)
            .max();
        if let Some(latest) = latest_end {
            if period_start < latest {
                return Err(StoreError::Conflict(format!(
                    "settlement window for {} overlaps a closed batch ending at {}",
                    payee, latest
                )));
            }
        }

        let candidates: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| is_candidate(t, &payee) && in_window(t, period_start, period_end))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let batch = SettlementBatch::assemble(payee, period_start, period_end, &candidates, now);
        for candidate in &candidates {
            if let Some(stored) = inner.transactions.get_mut(&candidate.id) {
                match payee.kind {
                    PayeeKind::Merchant => stored.settlement_id = Some(batch.id),
                    PayeeKind::SuperMerchant => stored.commission_settlement_id = Some(batch.id),
                }
                stored.version += 1;
                stored.updated_at = now;
            }
        }
        inner.settlements.insert(batch.id, batch.clone());
        Ok(Some(batch))
    }

    async fn settlement(&self, id: Uuid) -> StoreResult<Option<SettlementBatch>> {
        let inner = self.inner.lock().await;
        Ok(inner.settlements.get(&id).cloned())
    }

    async fn list_settlements(&self, limit: i64, offset: i64) -> StoreResult<Vec<SettlementBatch>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<SettlementBatch> = inner.settlements.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn advance_settlement(
        &self,
        id: Uuid,
        from: SettlementStatus,
        to: SettlementStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<SettlementBatch> {
        let mut inner = self.inner.lock().await;
        let batch = match inner.settlements.get_mut(&id) {
            Some(batch) => batch,
            None => return Err(StoreError::VersionConflict { id }),
        };
        if batch.status != from {
            return Err(StoreError::VersionConflict { id });
        }
        batch.status = to;
        batch.updated_at = now;
        if to.is_terminal() && batch.processed_at.is_none() {
            batch.processed_at = Some(now);
        }
        Ok(batch.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTransaction, PaymentMethod};
    use bigdecimal::BigDecimal;
    use chrono::Duration;
    use std::str::FromStr;

    fn new_tx(merchant_id: Uuid, super_id: Uuid, amount: &str) -> Transaction {
        let amount = BigDecimal::from_str(amount).unwrap();
        let merchant_fee = BigDecimal::from_str("1.00").unwrap();
        let commission = BigDecimal::from_str("2.00").unwrap();
        let net = &amount - &merchant_fee - &commission;
        Transaction::new(NewTransaction {
            merchant_id,
            super_merchant_id: Some(super_id),
            external_id: None,
            amount,
            currency: "USD".to_string(),
            payment_method: PaymentMethod::Card,
            merchant_fee,
            super_merchant_fee: commission,
            gateway_fee: BigDecimal::from(0),
            net_amount: net,
            customer_email: None,
            customer_name: None,
            fraud_score: None,
            fraud_status: None,
        })
    }

    fn succeeded_at(mut tx: Transaction, at: DateTime<Utc>) -> Transaction {
        tx.transition(TransactionStatus::Processing, at).unwrap();
        tx.transition(TransactionStatus::Succeeded, at).unwrap();
        tx
    }

    #[tokio::test]
    async fn insert_and_lookups() {
        let store = MemoryPaymentStore::new();
        let merchant = Uuid::new_v4();
        let mut tx = new_tx(merchant, Uuid::new_v4(), "25.00");
        tx.external_id = Some("order-77".to_string());
        store.insert_transaction(&tx).await.unwrap();

        assert!(store.transaction(tx.id).await.unwrap().is_some());
        assert!(store
            .transaction_by_external_id(merchant, "order-77")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .transaction_by_external_id(merchant, "order-78")
            .await
            .unwrap()
            .is_none());

        tx.record_gateway_reference("cf_abc");
        let updated = store.update_transaction(&tx).await.unwrap();
        assert_eq!(updated.version, tx.version + 1);
        assert!(store
            .transaction_by_gateway_id("cf_abc")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn duplicate_external_id_rejected() {
        let store = MemoryPaymentStore::new();
        let merchant = Uuid::new_v4();
        let mut first = new_tx(merchant, Uuid::new_v4(), "10.00");
        first.external_id = Some("order-1".to_string());
        store.insert_transaction(&first).await.unwrap();

        let mut second = new_tx(merchant, Uuid::new_v4(), "10.00");
        second.external_id = Some("order-1".to_string());
        let err = store.insert_transaction(&second).await.unwrap_err();
        assert!(err.is_duplicate());

        // Same reference under a different merchant is fine.
        let mut other = new_tx(Uuid::new_v4(), Uuid::new_v4(), "10.00");
        other.external_id = Some("order-1".to_string());
        store.insert_transaction(&other).await.unwrap();
    }

    #[tokio::test]
    async fn stale_write_is_a_version_conflict() {
        let store = MemoryPaymentStore::new();
        let tx = new_tx(Uuid::new_v4(), Uuid::new_v4(), "10.00");
        store.insert_transaction(&tx).await.unwrap();

        let mut copy_a = store.transaction(tx.id).await.unwrap().unwrap();
        let mut copy_b = store.transaction(tx.id).await.unwrap().unwrap();

        copy_a.transition(TransactionStatus::Processing, Utc::now()).unwrap();
        store.update_transaction(&copy_a).await.unwrap();

        copy_b.transition(TransactionStatus::Cancelled, Utc::now()).unwrap();
        let err = store.update_transaction(&copy_b).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { id } if id == tx.id));
    }

    #[tokio::test]
    async fn close_settlement_runs_both_payout_cycles() {
        let store = MemoryPaymentStore::new();
        let merchant = Uuid::new_v4();
        let super_merchant = Uuid::new_v4();
        let now = Utc::now();
        let start = now - Duration::days(1);

        let inside_a = succeeded_at(
            new_tx(merchant, super_merchant, "100.00"),
            now - Duration::hours(20),
        );
        let inside_b = succeeded_at(
            new_tx(merchant, super_merchant, "50.00"),
            now - Duration::hours(10),
        );
        let outside = succeeded_at(
            new_tx(merchant, super_merchant, "75.00"),
            now - Duration::days(3),
        );
        let still_pending = new_tx(merchant, super_merchant, "60.00");
        for tx in [&inside_a, &inside_b, &outside, &still_pending] {
            store.insert_transaction(tx).await.unwrap();
        }

        let merchant_batch = store
            .close_settlement(Payee::merchant(merchant), start, now, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merchant_batch.transaction_count, 2);
        assert_eq!(
            merchant_batch.amount_total,
            BigDecimal::from_str("150.00").unwrap()
        );
        assert_eq!(
            merchant_batch.fee_total,
            BigDecimal::from_str("6.00").unwrap()
        );
        assert_eq!(
            merchant_batch.net_amount,
            BigDecimal::from_str("144.00").unwrap()
        );

        let settled = store.transaction(inside_a.id).await.unwrap().unwrap();
        assert_eq!(settled.settlement_id, Some(merchant_batch.id));
        assert_eq!(settled.commission_settlement_id, None);

        // Commission cycle is independent and sums the commission slices.
        let commission_batch = store
            .close_settlement(Payee::super_merchant(super_merchant), start, now, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commission_batch.transaction_count, 2);
        assert_eq!(
            commission_batch.amount_total,
            BigDecimal::from_str("4.00").unwrap()
        );
        assert_eq!(commission_batch.fee_total, BigDecimal::from(0));

        let settled = store.transaction(inside_a.id).await.unwrap().unwrap();
        assert_eq!(settled.commission_settlement_id, Some(commission_batch.id));

        // The out-of-window transaction is untouched by both cycles.
        let untouched = store.transaction(outside.id).await.unwrap().unwrap();
        assert_eq!(untouched.settlement_id, None);
        assert_eq!(untouched.commission_settlement_id, None);
    }

    #[tokio::test]
    async fn empty_window_closes_to_none() {
        let store = MemoryPaymentStore::new();
        let now = Utc::now();
        let batch = store
            .close_settlement(Payee::merchant(Uuid::new_v4()), now - Duration::days(1), now, now)
            .await
            .unwrap();
        assert!(batch.is_none());
    }

    #[tokio::test]
    async fn overlapping_windows_rejected() {
        let store = MemoryPaymentStore::new();
        let merchant = Uuid::new_v4();
        let super_merchant = Uuid::new_v4();
        let now = Utc::now();

        let tx = succeeded_at(
            new_tx(merchant, super_merchant, "10.00"),
            now - Duration::hours(12),
        );
        store.insert_transaction(&tx).await.unwrap();
        store
            .close_settlement(Payee::merchant(merchant), now - Duration::days(1), now, now)
            .await
            .unwrap()
            .unwrap();

        let err = store
            .close_settlement(
                Payee::merchant(merchant),
                now - Duration::hours(6),
                now + Duration::hours(6),
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // A different payee is not constrained by this merchant's window.
        let ok = store
            .close_settlement(
                Payee::super_merchant(super_merchant),
                now - Duration::days(1),
                now,
                now,
            )
            .await
            .unwrap();
        assert!(ok.is_some());
    }

    #[tokio::test]
    async fn advance_settlement_is_compare_and_set() {
        let store = MemoryPaymentStore::new();
        let merchant = Uuid::new_v4();
        let now = Utc::now();
        let tx = succeeded_at(
            new_tx(merchant, Uuid::new_v4(), "10.00"),
            now - Duration::hours(1),
        );
        store.insert_transaction(&tx).await.unwrap();
        let batch = store
            .close_settlement(Payee::merchant(merchant), now - Duration::days(1), now, now)
            .await
            .unwrap()
            .unwrap();

        let processing = store
            .advance_settlement(
                batch.id,
                SettlementStatus::Pending,
                SettlementStatus::Processing,
                now,
            )
            .await
            .unwrap();
        assert_eq!(processing.status, SettlementStatus::Processing);
        assert!(processing.processed_at.is_none());

        // Stale expectation loses.
        let err = store
            .advance_settlement(
                batch.id,
                SettlementStatus::Pending,
                SettlementStatus::Processing,
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let completed = store
            .advance_settlement(
                batch.id,
                SettlementStatus::Processing,
                SettlementStatus::Completed,
                now,
            )
            .await
            .unwrap();
        assert_eq!(completed.processed_at, Some(now));
    }

    #[tokio::test]
    async fn stuck_and_expired_queries_filter_by_state() {
        let store = MemoryPaymentStore::new();
        let now = Utc::now();
        let merchant = Uuid::new_v4();
        let super_merchant = Uuid::new_v4();

        let mut stale_pending = new_tx(merchant, super_merchant, "10.00");
        stale_pending.updated_at = now - Duration::hours(2);
        let mut stale_processing = new_tx(merchant, super_merchant, "20.00");
        stale_processing
            .transition(TransactionStatus::Processing, now - Duration::hours(3))
            .unwrap();
        let fresh = new_tx(merchant, super_merchant, "30.00");

        let mut challenged = new_tx(merchant, super_merchant, "40.00");
        challenged
            .transition(TransactionStatus::Processing, now - Duration::hours(4))
            .unwrap();
        challenged
            .transition(TransactionStatus::RequiresAction, now - Duration::hours(4))
            .unwrap();
        challenged.open_three_ds_challenge(None, now - Duration::hours(4));

        for tx in [&stale_pending, &stale_processing, &fresh, &challenged] {
            store.insert_transaction(tx).await.unwrap();
        }

        let stuck = store
            .stuck_in_flight(now - Duration::hours(1), 10)
            .await
            .unwrap();
        let stuck_ids: Vec<Uuid> = stuck.iter().map(|t| t.id).collect();
        assert!(stuck_ids.contains(&stale_pending.id));
        assert!(stuck_ids.contains(&stale_processing.id));
        assert!(!stuck_ids.contains(&fresh.id));
        assert!(!stuck_ids.contains(&challenged.id));

        let expired = store
            .expired_challenges(now - Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, challenged.id);
    }
}
