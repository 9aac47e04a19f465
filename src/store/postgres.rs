//! Postgres implementation of [`PaymentStore`].
//!
//! Settlement closes run in a single database transaction: an advisory
//! lock serializes closes per payee, candidates are locked with
//! `FOR UPDATE`, and the batch insert plus the per-cycle marker update
//! commit together or not at all.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

use super::{PaymentStore, StoreError, StoreResult};
use crate::domain::transaction::UnknownValue;
use crate::domain::{
    FraudStatus, Payee, PayeeKind, PaymentMethod, SettlementBatch, SettlementStatus, ThreeDsStatus,
    Transaction, TransactionStatus,
};

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_write_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.code().as_deref() == Some("23505") {
            let constraint = db.constraint().unwrap_or("unique constraint").to_string();
            return StoreError::Duplicate { constraint };
        }
    }
    StoreError::Database(err)
}

fn parse_enum<T>(id: Uuid, field: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = UnknownValue>,
{
    raw.parse().map_err(|UnknownValue(value)| StoreError::Corrupt {
        id,
        reason: format!("{} holds unknown value {}", field, value),
    })
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, external_id, merchant_id, super_merchant_id,
                amount, currency, payment_method,
                merchant_fee, super_merchant_fee, gateway_fee, net_amount,
                status, fraud_score, fraud_status,
                requires_3ds, three_ds_status, three_ds_url, three_ds_issued_at,
                gateway_payment_id, gateway_status, failure_reason,
                settlement_id, commission_settlement_id,
                customer_email, customer_name,
                version, created_at, updated_at, processed_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26,
                $27, $28, $29
            )
            "#,
        )
        .bind(tx.id)
        .bind(&tx.external_id)
        .bind(tx.merchant_id)
        .bind(tx.super_merchant_id)
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(tx.payment_method.as_str())
        .bind(&tx.merchant_fee)
        .bind(&tx.super_merchant_fee)
        .bind(&tx.gateway_fee)
        .bind(&tx.net_amount)
        .bind(tx.status.as_str())
        .bind(tx.fraud_score)
        .bind(tx.fraud_status.map(|s| s.as_str()))
        .bind(tx.requires_3ds)
        .bind(tx.three_ds_status.as_str())
        .bind(&tx.three_ds_url)
        .bind(tx.three_ds_issued_at)
        .bind(&tx.gateway_payment_id)
        .bind(&tx.gateway_status)
        .bind(&tx.failure_reason)
        .bind(tx.settlement_id)
        .bind(tx.commission_settlement_id)
        .bind(&tx.customer_email)
        .bind(&tx.customer_name)
        .bind(tx.version)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.processed_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_err)?;

        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn transaction_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE gateway_payment_id = $1",
        )
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn transaction_by_external_id(
        &self,
        merchant_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE merchant_id = $1 AND external_id = $2",
        )
        .bind(merchant_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn update_transaction(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET
                status = $2,
                fraud_score = $3,
                fraud_status = $4,
                requires_3ds = $5,
                three_ds_status = $6,
                three_ds_url = $7,
                three_ds_issued_at = $8,
                gateway_payment_id = $9,
                gateway_status = $10,
                failure_reason = $11,
                settlement_id = $12,
                commission_settlement_id = $13,
                updated_at = $14,
                processed_at = $15,
                version = version + 1
            WHERE id = $1 AND version = $16
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(tx.fraud_score)
        .bind(tx.fraud_status.map(|s| s.as_str()))
        .bind(tx.requires_3ds)
        .bind(tx.three_ds_status.as_str())
        .bind(&tx.three_ds_url)
        .bind(tx.three_ds_issued_at)
        .bind(&tx.gateway_payment_id)
        .bind(&tx.gateway_status)
        .bind(&tx.failure_reason)
        .bind(tx.settlement_id)
        .bind(tx.commission_settlement_id)
        .bind(tx.updated_at)
        .bind(tx.processed_at)
        .bind(tx.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_err)?;

        match row {
            Some(row) => row.into_domain(),
            None => Err(StoreError::VersionConflict { id: tx.id }),
        }
    }

    async fn list_transactions(
        &self,
        merchant_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE ($1::uuid IS NULL OR merchant_id = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(merchant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn stuck_in_flight(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE status IN ('PENDING', 'PROCESSING') AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn expired_challenges(
        &self,
        issued_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE status = 'REQUIRES_ACTION' AND three_ds_issued_at < $1
            ORDER BY three_ds_issued_at ASC
            LIMIT $2
            "#,
        )
        .bind(issued_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn close_settlement(
        &self,
        payee: Payee,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SettlementBatch>> {
        let mut db_tx = self.pool.begin().await?;

        // Serialize closes per payee across the fleet.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(payee.to_string())
            .execute(&mut *db_tx)
            .await?;

        let latest_end: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(period_end) FROM settlement_batches WHERE payee_kind = $1 AND payee_id = $2",
        )
        .bind(payee.kind.as_str())
        .bind(payee.id)
        .fetch_one(&mut *db_tx)
        .await?;

        if let Some(latest) = latest_end {
            if period_start < latest {
                db_tx.rollback().await?;
                return Err(StoreError::Conflict(format!(
                    "settlement window for {} overlaps a closed batch ending at {}",
                    payee, latest
                )));
            }
        }

        let candidate_sql = match payee.kind {
            PayeeKind::Merchant => {
                r#"
                SELECT * FROM transactions
                WHERE merchant_id = $1
                  AND status = 'SUCCEEDED'
                  AND settlement_id IS NULL
                  AND processed_at >= $2 AND processed_at < $3
                ORDER BY processed_at ASC
                FOR UPDATE
                "#
            }
            PayeeKind::SuperMerchant => {
                r#"
                SELECT * FROM transactions
                WHERE super_merchant_id = $1
                  AND status = 'SUCCEEDED'
                  AND commission_settlement_id IS NULL
                  AND processed_at >= $2 AND processed_at < $3
                ORDER BY processed_at ASC
                FOR UPDATE
                "#
            }
        };
        let rows = sqlx::query_as::<_, TransactionRow>(candidate_sql)
            .bind(payee.id)
            .bind(period_start)
            .bind(period_end)
            .fetch_all(&mut *db_tx)
            .await?;

        if rows.is_empty() {
            db_tx.rollback().await?;
            return Ok(None);
        }

        let candidates = rows
            .into_iter()
            .map(|r| r.into_domain())
            .collect::<StoreResult<Vec<Transaction>>>()?;
        let batch = SettlementBatch::assemble(payee, period_start, period_end, &candidates, now);

        sqlx::query(
            r#"
            INSERT INTO settlement_batches (
                id, payee_kind, payee_id, period_start, period_end,
                transaction_count, amount_total, fee_total, net_amount,
                status, created_at, updated_at, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(batch.id)
        .bind(batch.payee.kind.as_str())
        .bind(batch.payee.id)
        .bind(batch.period_start)
        .bind(batch.period_end)
        .bind(batch.transaction_count)
        .bind(&batch.amount_total)
        .bind(&batch.fee_total)
        .bind(&batch.net_amount)
        .bind(batch.status.as_str())
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .bind(batch.processed_at)
        .execute(&mut *db_tx)
        .await?;

        let marker_sql = match payee.kind {
            PayeeKind::Merchant => {
                "UPDATE transactions SET settlement_id = $1, version = version + 1, updated_at = $2 WHERE id = ANY($3)"
            }
            PayeeKind::SuperMerchant => {
                "UPDATE transactions SET commission_settlement_id = $1, version = version + 1, updated_at = $2 WHERE id = ANY($3)"
            }
        };
        let ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
        sqlx::query(marker_sql)
            .bind(batch.id)
            .bind(now)
            .bind(&ids)
            .execute(&mut *db_tx)
            .await?;

        db_tx.commit().await?;
        Ok(Some(batch))
    }

    async fn settlement(&self, id: Uuid) -> StoreResult<Option<SettlementBatch>> {
        let row =
            sqlx::query_as::<_, SettlementRow>("SELECT * FROM settlement_batches WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn list_settlements(&self, limit: i64, offset: i64) -> StoreResult<Vec<SettlementBatch>> {
        let rows = sqlx::query_as::<_, SettlementRow>(
            "SELECT * FROM settlement_batches ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn advance_settlement(
        &self,
        id: Uuid,
        from: SettlementStatus,
        to: SettlementStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<SettlementBatch> {
        let row = sqlx::query_as::<_, SettlementRow>(
            r#"
            UPDATE settlement_batches SET
                status = $3,
                updated_at = $4,
                processed_at = CASE
                    WHEN $3 IN ('COMPLETED', 'FAILED') THEN COALESCE(processed_at, $4)
                    ELSE processed_at
                END
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            None => Err(StoreError::VersionConflict { id }),
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the store.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    external_id: Option<String>,
    merchant_id: Uuid,
    super_merchant_id: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    payment_method: String,
    merchant_fee: BigDecimal,
    super_merchant_fee: BigDecimal,
    gateway_fee: BigDecimal,
    net_amount: BigDecimal,
    status: String,
    fraud_score: Option<i32>,
    fraud_status: Option<String>,
    requires_3ds: bool,
    three_ds_status: String,
    three_ds_url: Option<String>,
    three_ds_issued_at: Option<DateTime<Utc>>,
    gateway_payment_id: Option<String>,
    gateway_status: Option<String>,
    failure_reason: Option<String>,
    settlement_id: Option<Uuid>,
    commission_settlement_id: Option<Uuid>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        let status: TransactionStatus = parse_enum(self.id, "status", &self.status)?;
        let payment_method: PaymentMethod =
            parse_enum(self.id, "payment_method", &self.payment_method)?;
        let three_ds_status: ThreeDsStatus =
            parse_enum(self.id, "three_ds_status", &self.three_ds_status)?;
        let fraud_status: Option<FraudStatus> = match &self.fraud_status {
            Some(raw) => Some(parse_enum(self.id, "fraud_status", raw)?),
            None => None,
        };

        Ok(Transaction {
            id: self.id,
            external_id: self.external_id,
            merchant_id: self.merchant_id,
            super_merchant_id: self.super_merchant_id,
            amount: self.amount,
            currency: self.currency,
            payment_method,
            merchant_fee: self.merchant_fee,
            super_merchant_fee: self.super_merchant_fee,
            gateway_fee: self.gateway_fee,
            net_amount: self.net_amount,
            status,
            fraud_score: self.fraud_score,
            fraud_status,
            requires_3ds: self.requires_3ds,
            three_ds_status,
            three_ds_url: self.three_ds_url,
            three_ds_issued_at: self.three_ds_issued_at,
            gateway_payment_id: self.gateway_payment_id,
            gateway_status: self.gateway_status,
            failure_reason: self.failure_reason,
            settlement_id: self.settlement_id,
            commission_settlement_id: self.commission_settlement_id,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    payee_kind: String,
    payee_id: Uuid,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    transaction_count: i32,
    amount_total: BigDecimal,
    fee_total: BigDecimal,
    net_amount: BigDecimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl SettlementRow {
    fn into_domain(self) -> StoreResult<SettlementBatch> {
        let kind: PayeeKind = parse_enum(self.id, "payee_kind", &self.payee_kind)?;
        let status: SettlementStatus = parse_enum(self.id, "status", &self.status)?;

        Ok(SettlementBatch {
            id: self.id,
            payee: Payee {
                kind,
                id: self.payee_id,
            },
            period_start: self.period_start,
            period_end: self.period_end,
            transaction_count: self.transaction_count,
            amount_total: self.amount_total,
            fee_total: self.fee_total,
            net_amount: self.net_amount,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
        })
    }
}
