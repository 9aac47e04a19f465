//! Persistence seam for transactions and settlement batches.
//!
//! Two implementations: Postgres for deployments, in-memory for tests
//! and the sandbox CLI. Writes to a transaction are guarded by its
//! `version` column; a lost race surfaces as [`StoreError::VersionConflict`]
//! and the caller re-reads and retries.

pub mod memory;
pub mod postgres;

pub use memory::MemoryPaymentStore;
pub use postgres::{create_pool, PgPaymentStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Payee, SettlementBatch, SettlementStatus, Transaction};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate row for {constraint}")]
    Duplicate { constraint: String },

    #[error("row {id} was modified concurrently")]
    VersionConflict { id: Uuid },

    #[error("{0}")]
    Conflict(String),

    #[error("stored row {id} is corrupt: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()>;

    async fn transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Webhooks and reconciliation join on the gateway's payment id.
    async fn transaction_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Idempotency lookup for merchant-supplied references.
    async fn transaction_by_external_id(
        &self,
        merchant_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Persists a mutated transaction. The write only lands if the row
    /// still carries the version the caller read; otherwise a concurrent
    /// writer won and this returns [`StoreError::VersionConflict`]. The
    /// returned copy carries the bumped version.
    async fn update_transaction(&self, tx: &Transaction) -> StoreResult<Transaction>;

    async fn list_transactions(
        &self,
        merchant_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// PENDING and PROCESSING transactions not touched since `cutoff`,
    /// oldest first. Reconciliation feeds on these.
    async fn stuck_in_flight(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// REQUIRES_ACTION transactions whose challenge was issued before
    /// `issued_before`.
    async fn expired_challenges(
        &self,
        issued_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Atomically assembles and records a settlement batch for the
    /// payee over `[period_start, period_end)` on `processed_at`,
    /// marking every captured transaction as settled for that payout
    /// cycle. Returns `None` when the window holds no candidates.
    ///
    /// Windows must not overlap a previously closed batch for the same
    /// payee; violations return [`StoreError::Conflict`].
    async fn close_settlement(
        &self,
        payee: Payee,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SettlementBatch>>;

    async fn settlement(&self, id: Uuid) -> StoreResult<Option<SettlementBatch>>;

    async fn list_settlements(&self, limit: i64, offset: i64) -> StoreResult<Vec<SettlementBatch>>;

    /// Compare-and-set advance: only lands if the batch still sits in
    /// `from`. A lost race returns [`StoreError::VersionConflict`].
    async fn advance_settlement(
        &self,
        id: Uuid,
        from: SettlementStatus,
        to: SettlementStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<SettlementBatch>;
}

impl StoreError {
    /// True for constraint races a caller can resolve by re-reading.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}
