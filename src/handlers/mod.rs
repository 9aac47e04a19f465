pub mod payments;
pub mod settlements;
pub mod webhook;

use crate::error::AppError;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MERCHANT_ID_HEADER: &str = "x-merchant-id";

/// The authenticated principal, carried as a header by the edge that
/// terminates API-key auth. Unknown or inactive merchants are rejected
/// by the service layer.
pub fn merchant_from_headers(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(MERCHANT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing X-Merchant-Id header".to_string()))?;
    raw.parse()
        .map_err(|_| AppError::Validation("X-Merchant-Id must be a UUID".to_string()))
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_pool: Option<DbPoolStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DbPoolStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
    pub usage_percent: f32,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (store, db_pool, healthy) = match &state.db {
        Some(pool) => {
            let connected = sqlx::query("SELECT 1").execute(pool).await.is_ok();
            let active_connections = pool.size();
            let idle_connections = pool.num_idle() as u32;
            let max_connections = pool.options().get_max_connections();
            let usage_percent = (active_connections as f32 / max_connections as f32) * 100.0;
            (
                if connected {
                    "postgres".to_string()
                } else {
                    "postgres (disconnected)".to_string()
                },
                Some(DbPoolStats {
                    active_connections,
                    idle_connections,
                    max_connections,
                    usage_percent,
                }),
                connected,
            )
        }
        None => ("memory".to_string(), None, true),
    };

    let response = HealthStatus {
        status: if healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        store,
        db_pool,
    };
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn merchant_header_is_required_and_must_be_a_uuid() {
        let empty = HeaderMap::new();
        assert!(matches!(
            merchant_from_headers(&empty),
            Err(AppError::Validation(_))
        ));

        let mut bad = HeaderMap::new();
        bad.insert(MERCHANT_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            merchant_from_headers(&bad),
            Err(AppError::Validation(_))
        ));

        let id = Uuid::new_v4();
        let mut good = HeaderMap::new();
        good.insert(
            MERCHANT_ID_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(merchant_from_headers(&good).unwrap(), id);
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let default = Pagination {
            limit: None,
            offset: None,
        };
        assert_eq!(default.limit(), 20);
        assert_eq!(default.offset(), 0);

        let wild = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(wild.limit(), 100);
        assert_eq!(wild.offset(), 0);
    }
}
