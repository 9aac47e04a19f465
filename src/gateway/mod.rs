//! Payment gateway adapter boundary.
//!
//! Everything upstream-specific stays behind [`Gateway`]: vendor field
//! names live in `circoflows`, deterministic test behavior in `sandbox`,
//! and the rest of the crate only ever sees [`GatewayResult`] and
//! [`GatewayError`].

pub mod circoflows;
pub mod sandbox;

pub use circoflows::CircoFlowsClient;
pub use sandbox::SandboxGateway;

use bigdecimal::BigDecimal;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::sanitize::mask_pan;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The upstream refused the charge. Terminal: retrying cannot help.
    #[error("payment declined: {reason}")]
    Declined { reason: String },

    /// Transport trouble or an open circuit breaker. The only class a
    /// caller may retry.
    #[error("gateway unavailable: {reason}")]
    Unavailable { reason: String },

    /// The upstream answered with something we cannot interpret.
    #[error("unexpected gateway response: {reason}")]
    Protocol { reason: String },
}

impl GatewayError {
    pub fn declined(reason: impl Into<String>) -> Self {
        GatewayError::Declined {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        GatewayError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        GatewayError::Protocol {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::protocol(err.to_string())
        } else {
            GatewayError::unavailable(err.to_string())
        }
    }
}

/// Upstream status collapsed to the handful of cases the engine acts
/// on. Anything unrecognized becomes `Other` and is never treated as
/// success; the raw string stays available on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Succeeded,
    Processing,
    RequiresAction,
    Failed,
    Other,
}

pub fn normalize_status(raw: &str) -> GatewayStatus {
    match raw.to_ascii_lowercase().as_str() {
        "completed" | "success" | "succeeded" => GatewayStatus::Succeeded,
        "pending" | "processing" => GatewayStatus::Processing,
        "requires_action" | "requires_3ds" => GatewayStatus::RequiresAction,
        "failed" | "declined" => GatewayStatus::Failed,
        _ => GatewayStatus::Other,
    }
}

/// Normalized view of an upstream payment, shared by every adapter
/// operation.
#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub payment_id: String,
    pub status: GatewayStatus,
    pub raw_status: String,
    pub requires_3ds: bool,
    pub three_ds_url: Option<String>,
    pub payment_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// Card data as collected from the payer. Debug output masks the PAN
/// and hides the CVV so a stray log line can never leak card data.
#[derive(Clone)]
pub struct CardDetails {
    pub number: String,
    pub expiry: String,
    pub cvv: String,
    pub holder_name: Option<String>,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &mask_pan(&self.number))
            .field("expiry", &self.expiry)
            .field("cvv", &"***")
            .field("holder_name", &self.holder_name)
            .finish()
    }
}

/// Vendor-neutral charge request. `merchant_reference` is our
/// transaction id and doubles as the upstream idempotency key, so a
/// retried request can never charge twice.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub merchant_reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub card: Option<CardDetails>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub return_url: Option<String>,
    pub webhook_url: Option<String>,
}

/// Bounded exponential backoff for [`GatewayError::Unavailable`] only.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): doubles
    /// each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Runs a gateway call under the retry policy. Declines and protocol
/// errors pass straight through; only unavailability is retried, and
/// the caller's request (with its merchant_reference) is reused as-is.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "gateway unavailable, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Tagged dispatch over the configured upstream. Selection happens once
/// at startup from config; call sites never branch on vendor.
#[derive(Clone)]
pub enum Gateway {
    CircoFlows(CircoFlowsClient),
    Sandbox(SandboxGateway),
}

impl Gateway {
    pub fn name(&self) -> &'static str {
        match self {
            Gateway::CircoFlows(_) => "circoflows",
            Gateway::Sandbox(_) => "sandbox",
        }
    }

    pub async fn create_direct_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.create_direct_payment(request).await,
            Gateway::Sandbox(sandbox) => sandbox.create_direct_payment(request).await,
        }
    }

    pub async fn create_hosted_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.create_hosted_payment(request).await,
            Gateway::Sandbox(sandbox) => sandbox.create_hosted_payment(request).await,
        }
    }

    pub async fn confirm_three_ds(
        &self,
        payment_id: &str,
        result: &str,
    ) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.confirm_three_ds(payment_id, result).await,
            Gateway::Sandbox(sandbox) => sandbox.confirm_three_ds(payment_id, result).await,
        }
    }

    pub async fn get_status(&self, payment_id: &str) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.get_status(payment_id).await,
            Gateway::Sandbox(sandbox) => sandbox.get_status(payment_id).await,
        }
    }

    pub async fn capture(
        &self,
        payment_id: &str,
        amount: Option<&BigDecimal>,
    ) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.capture(payment_id, amount).await,
            Gateway::Sandbox(sandbox) => sandbox.capture(payment_id, amount).await,
        }
    }

    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Option<&BigDecimal>,
        reason: Option<&str>,
    ) -> Result<GatewayResult, GatewayError> {
        match self {
            Gateway::CircoFlows(client) => client.refund(payment_id, amount, reason).await,
            Gateway::Sandbox(sandbox) => sandbox.refund(payment_id, amount, reason).await,
        }
    }
}
