use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FraudStatus, ThreeDsStatus, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::services::{DirectChargeInput, HostedChargeInput};
use crate::AppState;

use super::{merchant_from_headers, Pagination};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
}

// No Debug derive: the raw PAN and CVV must never reach a log line.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDirectPaymentRequest {
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmThreeDsRequest {
    pub transaction_id: Uuid,
    pub result: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

/// Slim answer for the payment-creation ceremony.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    #[serde(rename = "requires3DS")]
    pub requires_3ds: bool,
    #[serde(rename = "threeDSUrl", skip_serializing_if = "Option::is_none")]
    pub three_ds_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

impl PaymentResponse {
    fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            requires_3ds: tx.requires_3ds,
            three_ds_url: tx.three_ds_url.clone(),
            payment_url: None,
        }
    }
}

/// Full merchant-facing record of one transaction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub merchant_fee: BigDecimal,
    pub super_merchant_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub net_amount: BigDecimal,
    #[serde(rename = "requires3DS")]
    pub requires_3ds: bool,
    pub three_ds_status: ThreeDsStatus,
    #[serde(rename = "threeDSUrl", skip_serializing_if = "Option::is_none")]
    pub three_ds_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_status: Option<FraudStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_settlement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            external_id: tx.external_id,
            merchant_id: tx.merchant_id,
            amount: tx.amount,
            currency: tx.currency,
            status: tx.status,
            merchant_fee: tx.merchant_fee,
            super_merchant_fee: tx.super_merchant_fee,
            gateway_fee: tx.gateway_fee,
            net_amount: tx.net_amount,
            requires_3ds: tx.requires_3ds,
            three_ds_status: tx.three_ds_status,
            three_ds_url: tx.three_ds_url,
            gateway_payment_id: tx.gateway_payment_id,
            failure_reason: tx.failure_reason,
            fraud_status: tx.fraud_status,
            settlement_id: tx.settlement_id,
            commission_settlement_id: tx.commission_settlement_id,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            processed_at: tx.processed_at,
        }
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let hosted = state
        .payments
        .create_hosted_payment(HostedChargeInput {
            merchant_id,
            external_id: request.external_id,
            amount: request.amount,
            currency: request.currency,
            customer_email: request.customer_email,
            customer_name: request.customer_name,
        })
        .await?;

    let mut response = PaymentResponse::from_transaction(&hosted.transaction);
    response.payment_url = hosted.payment_url;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn create_direct_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateDirectPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let tx = state
        .payments
        .create_direct_payment(DirectChargeInput {
            merchant_id,
            external_id: request.external_id,
            amount: request.amount,
            currency: request.currency,
            card_number: request.card_number,
            expiry: request.expiry,
            cvv: request.cvv,
            cardholder_name: request.cardholder_name,
            customer_email: request.customer_email,
            customer_name: request.customer_name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse::from_transaction(&tx)),
    ))
}

pub async fn confirm_three_ds(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConfirmThreeDsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let tx = state
        .payments
        .confirm_three_ds(merchant_id, request.transaction_id, &request.result)
        .await?;
    Ok(Json(PaymentResponse::from_transaction(&tx)))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let tx = state
        .payments
        .refund(merchant_id, id, request.amount, request.reason)
        .await?;
    Ok(Json(TransactionView::from(tx)))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let tx = state.payments.cancel(merchant_id, id).await?;
    Ok(Json(TransactionView::from(tx)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let tx = state.payments.get_payment(merchant_id, id).await?;
    Ok(Json(TransactionView::from(tx)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let merchant_id = merchant_from_headers(&headers)?;
    let transactions = state
        .payments
        .list_payments(merchant_id, pagination.limit(), pagination.offset())
        .await?;
    let views: Vec<TransactionView> = transactions.into_iter().map(TransactionView::from).collect();
    Ok(Json(views))
}
