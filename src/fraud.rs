//! Fraud scoring seam.
//!
//! Scores run before any gateway call. The engine turns a score into a
//! [`FraudStatus`] via the fixed review/block thresholds and persists
//! both on the transaction; blocked charges never reach the gateway.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::domain::FraudStatus;

/// What a scorer gets to look at. Card data is already validated and
/// normalized by the time it lands here.
pub struct ChargeContext<'a> {
    pub merchant_id: Uuid,
    pub amount: &'a BigDecimal,
    pub currency: &'a str,
    pub customer_email: Option<&'a str>,
    pub card_number: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FraudAssessment {
    pub score: i32,
    pub status: FraudStatus,
}

impl FraudAssessment {
    pub fn from_score(score: i32) -> Self {
        Self {
            score,
            status: FraudStatus::from_score(score),
        }
    }
}

#[async_trait]
pub trait FraudScorer: Send + Sync {
    async fn assess(&self, context: &ChargeContext<'_>) -> FraudAssessment;
}

/// Default scorer: everything passes with a zero score.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllScorer;

#[async_trait]
impl FraudScorer for AllowAllScorer {
    async fn assess(&self, _context: &ChargeContext<'_>) -> FraudAssessment {
        FraudAssessment::from_score(0)
    }
}

/// Test scorer that always returns the same score.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer {
    score: i32,
}

impl FixedScorer {
    pub fn new(score: i32) -> Self {
        Self { score }
    }
}

#[async_trait]
impl FraudScorer for FixedScorer {
    async fn assess(&self, _context: &ChargeContext<'_>) -> FraudAssessment {
        FraudAssessment::from_score(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn context<'a>(amount: &'a BigDecimal) -> ChargeContext<'a> {
        ChargeContext {
            merchant_id: Uuid::new_v4(),
            amount,
            currency: "USD",
            customer_email: Some("payer@example.com"),
            card_number: Some("4242424242424242"),
        }
    }

    #[tokio::test]
    async fn allow_all_scorer_clears_everything() {
        let amount = BigDecimal::from_str("15000.00").unwrap();
        let assessment = AllowAllScorer.assess(&context(&amount)).await;
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.status, FraudStatus::Clean);
    }

    #[tokio::test]
    async fn fixed_scorer_maps_through_thresholds() {
        let amount = BigDecimal::from_str("10.00").unwrap();
        let review = FixedScorer::new(70).assess(&context(&amount)).await;
        assert_eq!(review.status, FraudStatus::Review);

        let blocked = FixedScorer::new(95).assess(&context(&amount)).await;
        assert_eq!(blocked.status, FraudStatus::Blocked);
    }
}
