use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Payee, PayeeKind, SettlementBatch, SettlementStatus};
use crate::error::AppError;
use crate::AppState;

use super::Pagination;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSettlementRequest {
    pub payee_kind: PayeeKind,
    pub payee_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceSettlementRequest {
    pub status: SettlementStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementView {
    pub id: Uuid,
    pub payee_kind: PayeeKind,
    pub payee_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub transaction_count: i32,
    pub amount_total: BigDecimal,
    pub fee_total: BigDecimal,
    pub net_amount: BigDecimal,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<SettlementBatch> for SettlementView {
    fn from(batch: SettlementBatch) -> Self {
        Self {
            id: batch.id,
            payee_kind: batch.payee.kind,
            payee_id: batch.payee.id,
            period_start: batch.period_start,
            period_end: batch.period_end,
            transaction_count: batch.transaction_count,
            amount_total: batch.amount_total,
            fee_total: batch.fee_total,
            net_amount: batch.net_amount,
            status: batch.status,
            created_at: batch.created_at,
            updated_at: batch.updated_at,
            processed_at: batch.processed_at,
        }
    }
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let batches = state
        .settlements
        .list(pagination.limit(), pagination.offset())
        .await?;
    let views: Vec<SettlementView> = batches.into_iter().map(SettlementView::from).collect();
    Ok(Json(views))
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let batch = state.settlements.batch(id).await?;
    Ok(Json(SettlementView::from(batch)))
}

/// Closes one payout window on demand. 201 with the batch when the
/// window held transactions, 200 with `closed: false` when it was
/// empty.
pub async fn close_settlement(
    State(state): State<AppState>,
    Json(request): Json<CloseSettlementRequest>,
) -> Result<Response, AppError> {
    let payee = Payee {
        kind: request.payee_kind,
        id: request.payee_id,
    };
    let closed = state
        .settlements
        .close_batch(payee, request.period_start, request.period_end, Utc::now())
        .await?;

    Ok(match closed {
        Some(batch) => (StatusCode::CREATED, Json(SettlementView::from(batch))).into_response(),
        None => Json(json!({
            "closed": false,
            "reason": "no transactions in window",
        }))
        .into_response(),
    })
}

pub async fn advance_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdvanceSettlementRequest>,
) -> Result<impl IntoResponse, AppError> {
    let batch = state
        .settlements
        .advance(id, request.status, Utc::now())
        .await?;
    Ok(Json(SettlementView::from(batch)))
}
