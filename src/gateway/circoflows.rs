//! Live CircoFlows API client. All vendor field names, endpoint paths
//! and header conventions are confined to this file.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{Config, Error as FailsafeError, StateMachine, backoff, failure_policy};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{ChargeRequest, GatewayError, GatewayResult, GatewayStatus, normalize_status};
use bigdecimal::BigDecimal;

pub const API_VERSION: &str = "1.0";

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Clone)]
pub struct CircoFlowsClient {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: Breaker,
}

impl CircoFlowsClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, api_key, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        CircoFlowsClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    pub async fn create_direct_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        let card = request
            .card
            .as_ref()
            .ok_or_else(|| GatewayError::protocol("card details required for direct payment"))?;
        let (expiry_month, expiry_year) = split_expiry(&card.expiry)?;

        let body = DirectPaymentBody {
            amount: request.amount.to_string(),
            currency: &request.currency,
            payment_method: "card",
            card_number: &card.number,
            expiry_month,
            expiry_year,
            cvv: &card.cvv,
            customer_info: CustomerInfo {
                name: request.customer_name.as_deref().unwrap_or(""),
                email: request.customer_email.as_deref().unwrap_or(""),
            },
            metadata: MetadataBody {
                merchant_reference: &request.merchant_reference,
            },
            webhook_url: request.webhook_url.as_deref(),
            return_url: request.return_url.as_deref(),
        };

        self.send(Method::POST, "/payments", Some(&body)).await
    }

    pub async fn create_hosted_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        let body = HostedPaymentBody {
            amount: request.amount.to_string(),
            currency: &request.currency,
            customer_info: CustomerInfo {
                name: request.customer_name.as_deref().unwrap_or(""),
                email: request.customer_email.as_deref().unwrap_or(""),
            },
            metadata: MetadataBody {
                merchant_reference: &request.merchant_reference,
            },
            webhook_url: request.webhook_url.as_deref(),
            return_url: request.return_url.as_deref(),
        };

        self.send(Method::POST, "/payments/hosted", Some(&body)).await
    }

    pub async fn confirm_three_ds(
        &self,
        payment_id: &str,
        result: &str,
    ) -> Result<GatewayResult, GatewayError> {
        let path = format!("/payments/{}/3ds/confirm", payment_id);
        let body = ConfirmBody {
            three_ds_result: result,
        };
        self.send(Method::POST, &path, Some(&body)).await
    }

    pub async fn get_status(&self, payment_id: &str) -> Result<GatewayResult, GatewayError> {
        let path = format!("/payments/{}", payment_id);
        self.send::<()>(Method::GET, &path, None).await
    }

    pub async fn capture(
        &self,
        payment_id: &str,
        amount: Option<&BigDecimal>,
    ) -> Result<GatewayResult, GatewayError> {
        let path = format!("/payments/{}/capture", payment_id);
        let body = CaptureBody {
            amount: amount.map(|a| a.to_string()),
        };
        self.send(Method::POST, &path, Some(&body)).await
    }

    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Option<&BigDecimal>,
        reason: Option<&str>,
    ) -> Result<GatewayResult, GatewayError> {
        let path = format!("/payments/{}/refund", payment_id);
        let body = RefundBody {
            amount: amount.map(|a| a.to_string()),
            reason,
        };
        self.send(Method::POST, &path, Some(&body)).await
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<GatewayResult, GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        let result = self
            .circuit_breaker
            .call_with(GatewayError::is_retryable, async move {
                let mut request = client
                    .request(method, &url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("X-API-Version", API_VERSION);
                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = request.send().await.map_err(GatewayError::from)?;
                interpret(response).await
            })
            .await;

        match result {
            Ok(result) => Ok(result),
            Err(FailsafeError::Rejected) => {
                Err(GatewayError::unavailable("gateway circuit breaker is open"))
            }
            Err(FailsafeError::Inner(err)) => Err(err),
        }
    }
}

async fn interpret(response: reqwest::Response) -> Result<GatewayResult, GatewayError> {
    let status = response.status();

    if status.is_success() {
        let envelope = response
            .json::<ApiEnvelope>()
            .await
            .map_err(GatewayError::from)?;
        let data = envelope
            .data
            .ok_or_else(|| GatewayError::protocol("response missing data"))?;
        return into_result(data);
    }

    let message = response
        .json::<ApiEnvelope>()
        .await
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message);

    match status {
        StatusCode::PAYMENT_REQUIRED | StatusCode::UNPROCESSABLE_ENTITY => Err(
            GatewayError::declined(message.unwrap_or_else(|| "Payment declined".to_string())),
        ),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Err(
            GatewayError::unavailable(message.unwrap_or_else(|| format!("gateway returned {}", status))),
        ),
        s if s.is_server_error() => Err(GatewayError::unavailable(
            message.unwrap_or_else(|| format!("gateway returned {}", status)),
        )),
        _ => Err(GatewayError::protocol(
            message.unwrap_or_else(|| format!("gateway returned {}", status)),
        )),
    }
}

fn into_result(data: PaymentData) -> Result<GatewayResult, GatewayError> {
    let payment_id = data
        .transaction_id
        .ok_or_else(|| GatewayError::protocol("response missing transaction_id"))?;
    let raw_status = data
        .status
        .ok_or_else(|| GatewayError::protocol("response missing status"))?;
    let status = normalize_status(&raw_status);

    let three_ds_url = data.three_ds_url.or_else(|| {
        data.action_data
            .get("3ds_url")
            .and_then(|value| value.as_str().map(str::to_string))
    });
    let requires_3ds =
        data.requires_3ds || data.requires_action || status == GatewayStatus::RequiresAction;

    Ok(GatewayResult {
        payment_id,
        status,
        raw_status,
        requires_3ds,
        three_ds_url,
        payment_url: data.payment_url,
        failure_reason: data.failure_reason,
    })
}

fn split_expiry(expiry: &str) -> Result<(String, String), GatewayError> {
    let (month, year) = expiry
        .split_once('/')
        .ok_or_else(|| GatewayError::protocol("card expiry must be MM/YY"))?;
    Ok((month.to_string(), format!("20{}", year)))
}

#[derive(Serialize)]
struct CustomerInfo<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct MetadataBody<'a> {
    merchant_reference: &'a str,
}

#[derive(Serialize)]
struct DirectPaymentBody<'a> {
    amount: String,
    currency: &'a str,
    payment_method: &'static str,
    card_number: &'a str,
    expiry_month: String,
    expiry_year: String,
    cvv: &'a str,
    customer_info: CustomerInfo<'a>,
    metadata: MetadataBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
}

#[derive(Serialize)]
struct HostedPaymentBody<'a> {
    amount: String,
    currency: &'a str,
    customer_info: CustomerInfo<'a>,
    metadata: MetadataBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfirmBody<'a> {
    #[serde(rename = "threeDSResult")]
    three_ds_result: &'a str,
}

#[derive(Serialize)]
struct CaptureBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    data: Option<PaymentData>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct PaymentData {
    transaction_id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    requires_3ds: bool,
    #[serde(default)]
    requires_action: bool,
    three_ds_url: Option<String>,
    #[serde(default)]
    action_data: HashMap<String, serde_json::Value>,
    payment_url: Option<String>,
    failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CardDetails;
    use std::str::FromStr;

    fn client_for(url: String) -> CircoFlowsClient {
        CircoFlowsClient::new(url, "sk_test_123".to_string(), Duration::from_secs(5))
    }

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            merchant_reference: "1f0c7a3e-5d0a-4a7e-9b59-1df0a1b2c3d4".to_string(),
            amount: BigDecimal::from_str("100.00").unwrap(),
            currency: "USD".to_string(),
            card: Some(CardDetails {
                number: "4242424242424242".to_string(),
                expiry: "12/30".to_string(),
                cvv: "123".to_string(),
                holder_name: Some("Ada Lovelace".to_string()),
            }),
            customer_email: Some("ada@example.com".to_string()),
            customer_name: Some("Ada Lovelace".to_string()),
            return_url: None,
            webhook_url: None,
        }
    }

    #[test]
    fn client_creation() {
        let client = client_for("https://api.circoflows.example".to_string());
        assert_eq!(client.base_url, "https://api.circoflows.example");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn expiry_splits_into_vendor_fields() {
        assert_eq!(
            split_expiry("12/30").unwrap(),
            ("12".to_string(), "2030".to_string())
        );
        assert!(split_expiry("1230").is_err());
    }

    #[test]
    fn result_mapping_reads_action_data_fallback() {
        let data: PaymentData = serde_json::from_str(
            r#"{
                "transaction_id": "cf_123",
                "status": "requires_3ds",
                "action_data": { "3ds_url": "https://gateway.test/3ds/cf_123" }
            }"#,
        )
        .unwrap();
        let result = into_result(data).unwrap();
        assert_eq!(result.payment_id, "cf_123");
        assert_eq!(result.status, GatewayStatus::RequiresAction);
        assert!(result.requires_3ds);
        assert_eq!(
            result.three_ds_url.as_deref(),
            Some("https://gateway.test/3ds/cf_123")
        );
    }

    #[test]
    fn result_mapping_requires_id_and_status() {
        let missing_id: PaymentData =
            serde_json::from_str(r#"{ "status": "completed" }"#).unwrap();
        assert!(matches!(
            into_result(missing_id),
            Err(GatewayError::Protocol { .. })
        ));

        let missing_status: PaymentData =
            serde_json::from_str(r#"{ "transaction_id": "cf_1" }"#).unwrap();
        assert!(matches!(
            into_result(missing_status),
            Err(GatewayError::Protocol { .. })
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn direct_payment_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "data": {
                        "transaction_id": "cf_abc123",
                        "status": "completed",
                        "requires_3ds": false
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = client_for(server.url());
        let result = client.create_direct_payment(&charge_request()).await.unwrap();

        assert_eq!(result.payment_id, "cf_abc123");
        assert_eq!(result.status, GatewayStatus::Succeeded);
        assert_eq!(result.raw_status, "completed");
    }

    #[tokio::test]
    #[ignore]
    async fn declined_payment_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .with_status(402)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "error": { "message": "Insufficient funds" } }"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(server.url());
        let err = client
            .create_direct_payment(&charge_request())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::Declined {
                reason: "Insufficient funds".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    #[ignore]
    async fn server_error_maps_to_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"/payments/.*".into()))
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(server.url());
        let err = client.get_status("cf_down").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    #[ignore]
    async fn circuit_breaker_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"/payments/.*".into()))
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = CircoFlowsClient::with_circuit_breaker(
            server.url(),
            "sk_test_123".to_string(),
            Duration::from_secs(5),
            3,
            60,
        );

        for _ in 0..3 {
            let _ = client.get_status("cf_1").await;
        }

        let err = client.get_status("cf_1").await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Unavailable {
                reason: "gateway circuit breaker is open".to_string()
            }
        );
        assert_eq!(client.circuit_state(), "open");
    }
}
