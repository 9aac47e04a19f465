use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde_json::json;

use crate::error::AppError;
use crate::sanitize::sanitize_json;
use crate::services::WebhookOutcome;
use crate::webhook::{GatewayEvent, SIGNATURE_HEADER};
use crate::AppState;

/// CircoFlows event delivery. The signature is checked against the raw
/// body before anything is parsed; an unverifiable payload changes no
/// state and gets a 401. Applied and ignored events both answer 200 so
/// the gateway stops redelivering.
pub async fn circoflows_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::SignatureVerification)?;
    if !state.webhook_verifier.verify(&body, signature) {
        tracing::warn!("rejected webhook delivery with a bad signature");
        return Err(AppError::SignatureVerification);
    }
    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
            tracing::debug!(payload = %sanitize_json(&value), "webhook delivery verified");
        }
    }

    let event = GatewayEvent::parse(&body)
        .map_err(|err| AppError::Validation(format!("malformed webhook payload: {}", err)))?;

    match state.payments.handle_webhook_event(&event).await? {
        WebhookOutcome::Applied(tx) => Ok(Json(json!({
            "received": true,
            "transactionId": tx.id,
            "status": tx.status,
        }))),
        WebhookOutcome::Ignored(reason) => Ok(Json(json!({
            "received": true,
            "ignored": reason,
        }))),
    }
}
