use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::domain::settlement::InvalidAdvance;
use crate::domain::transaction::InvalidTransition;
use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment declined: {0}")]
    GatewayDeclined(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::GatewayDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::SignatureVerification => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Declined { reason } => AppError::GatewayDeclined(reason),
            GatewayError::Unavailable { reason } => AppError::GatewayUnavailable(reason),
            GatewayError::Protocol { reason } => {
                AppError::GatewayUnavailable(format!("malformed gateway response: {}", reason))
            }
        }
    }
}

impl From<InvalidTransition> for AppError {
    fn from(err: InvalidTransition) -> Self {
        AppError::InvalidState(err.to_string())
    }
}

impl From<InvalidAdvance> for AppError {
    fn from(err: InvalidAdvance) -> Self {
        AppError::InvalidState(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_bad_request() {
        let error = AppError::Validation("amount must be greater than zero".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn declined_maps_to_payment_required() {
        let error = AppError::GatewayDeclined("Your card was declined".to_string());
        assert_eq!(error.status_code(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn unavailable_maps_to_bad_gateway() {
        let error = AppError::GatewayUnavailable("connect timeout".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn invalid_state_maps_to_conflict() {
        let error = AppError::InvalidState("refund requires a succeeded transaction".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn signature_failure_maps_to_unauthorized() {
        assert_eq!(
            AppError::SignatureVerification.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        let error = AppError::NotFound("transaction".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn error_response_carries_status() {
        let response = AppError::GatewayDeclined("Insufficient funds".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn store_error_response_is_500() {
        let response =
            AppError::Store(StoreError::VersionConflict { id: uuid::Uuid::new_v4() }).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
