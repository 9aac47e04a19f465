pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod fees;
pub mod fraud;
pub mod gateway;
pub mod handlers;
pub mod merchants;
pub mod sanitize;
pub mod services;
pub mod store;
pub mod validation;
pub mod webhook;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::merchants::MerchantDirectory;
use crate::services::{PaymentService, SettlementAggregator};
use crate::webhook::WebhookVerifier;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub settlements: Arc<SettlementAggregator>,
    pub merchants: Arc<dyn MerchantDirectory>,
    pub webhook_verifier: Arc<WebhookVerifier>,
    /// Present only when the store is Postgres-backed; health reporting
    /// uses it for pool statistics.
    pub db: Option<sqlx::PgPool>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route(
            "/payments/direct",
            post(handlers::payments::create_direct_payment),
        )
        .route(
            "/payments/3ds-confirm",
            post(handlers::payments::confirm_three_ds),
        )
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/refund",
            post(handlers::payments::refund_payment),
        )
        .route(
            "/payments/:id/cancel",
            post(handlers::payments::cancel_payment),
        )
        .route("/transactions", get(handlers::payments::list_transactions))
        .route(
            "/webhooks/circoflows",
            post(handlers::webhook::circoflows_webhook),
        )
        .route(
            "/settlements",
            get(handlers::settlements::list_settlements),
        )
        .route(
            "/settlements/close",
            post(handlers::settlements::close_settlement),
        )
        .route("/settlements/:id", get(handlers::settlements::get_settlement))
        .route(
            "/settlements/:id/advance",
            post(handlers::settlements::advance_settlement),
        )
        .with_state(state)
}

/// CORS policy from the comma-separated origin list in config; `*`
/// means any origin.
pub fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
