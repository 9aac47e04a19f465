//! Fee computation. Pure and deterministic: same inputs, same breakdown.
//!
//! Rates come from a versioned [`FeeSchedule`] document, never from code.
//! Each fee component is rounded half-even at the currency's minor unit;
//! the net amount is derived by subtraction and never rounded on its
//! own, so the breakdown always sums back to the gross amount exactly.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::currency;
use crate::domain::transaction::UnknownValue;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeTier {
    Standard,
    Preferred,
    Enterprise,
}

impl FeeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeTier::Standard => "STANDARD",
            FeeTier::Preferred => "PREFERRED",
            FeeTier::Enterprise => "ENTERPRISE",
        }
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeTier {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "STANDARD" => Ok(FeeTier::Standard),
            "PREFERRED" => Ok(FeeTier::Preferred),
            "ENTERPRISE" => Ok(FeeTier::Enterprise),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// A percent-of-amount component plus a flat component in the major
/// unit of the transaction currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    pub percent: BigDecimal,
    #[serde(default = "zero")]
    pub flat: BigDecimal,
}

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRates {
    pub merchant: FeeRates,
    pub commission_percent: BigDecimal,
    pub gateway: FeeRates,
}

/// Externally versioned rate document. Historical transactions keep the
/// fees they were born with; swapping in a new version only affects
/// future charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub version: u32,
    pub tiers: HashMap<FeeTier, TierRates>,
}

impl FeeSchedule {
    /// Platform defaults, matching the rates merchants are onboarded
    /// with when no override document is installed.
    pub fn platform_default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert(
            FeeTier::Standard,
            TierRates {
                merchant: FeeRates {
                    percent: dec("1.5"),
                    flat: zero(),
                },
                commission_percent: dec("2.5"),
                gateway: FeeRates {
                    percent: zero(),
                    flat: zero(),
                },
            },
        );
        tiers.insert(
            FeeTier::Preferred,
            TierRates {
                merchant: FeeRates {
                    percent: dec("1.2"),
                    flat: zero(),
                },
                commission_percent: dec("2.0"),
                gateway: FeeRates {
                    percent: zero(),
                    flat: zero(),
                },
            },
        );
        tiers.insert(
            FeeTier::Enterprise,
            TierRates {
                merchant: FeeRates {
                    percent: dec("0.9"),
                    flat: zero(),
                },
                commission_percent: dec("1.5"),
                gateway: FeeRates {
                    percent: zero(),
                    flat: zero(),
                },
            },
        );
        Self { version: 1, tiers }
    }

    /// Sanity bounds for an installed document: percents within
    /// [0, 100], flats non-negative.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let hundred = BigDecimal::from(100);
        for rates in self.tiers.values() {
            for (field, percent) in [
                ("merchant.percent", &rates.merchant.percent),
                ("commission_percent", &rates.commission_percent),
                ("gateway.percent", &rates.gateway.percent),
            ] {
                if percent < &zero() || percent > &hundred {
                    return Err(ValidationError::new(
                        "fee_schedule",
                        format!("{} must be between 0 and 100", field),
                    ));
                }
            }
            for (field, flat) in [
                ("merchant.flat", &rates.merchant.flat),
                ("gateway.flat", &rates.gateway.flat),
            ] {
                if flat < &zero() {
                    return Err(ValidationError::new(
                        "fee_schedule",
                        format!("{} must not be negative", field),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn dec(value: &str) -> BigDecimal {
    // only called with literal rate strings
    BigDecimal::from_str(value).unwrap_or_else(|_| BigDecimal::from(0))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeBreakdown {
    pub merchant_fee: BigDecimal,
    pub super_merchant_fee: BigDecimal,
    pub gateway_fee: BigDecimal,
    pub net_amount: BigDecimal,
    pub schedule_version: u32,
}

pub struct FeeCalculator;

impl FeeCalculator {
    /// Splits a gross amount into its fee components and the merchant's
    /// net. Rejects rather than guesses: non-positive amounts, unknown
    /// currencies, amounts carrying more precision than the currency
    /// supports, a tier missing from the schedule, and flat fees that
    /// would push the net below zero all come back as validation errors.
    pub fn compute(
        amount: &BigDecimal,
        currency: &str,
        schedule: &FeeSchedule,
        tier: FeeTier,
    ) -> Result<FeeBreakdown, ValidationError> {
        if amount <= &BigDecimal::from(0) {
            return Err(ValidationError::new("amount", "must be greater than zero"));
        }
        let minor_units = currency::minor_units(currency).ok_or_else(|| {
            ValidationError::new("currency", format!("unsupported currency: {}", currency))
        })?;
        let (_, precision) = amount.normalized().as_bigint_and_exponent();
        if precision > minor_units {
            return Err(ValidationError::new(
                "amount",
                format!(
                    "{} supports at most {} decimal places",
                    currency, minor_units
                ),
            ));
        }
        let rates = schedule.tiers.get(&tier).ok_or_else(|| {
            ValidationError::new("fee_schedule", format!("no rates for tier {}", tier))
        })?;

        let hundred = BigDecimal::from(100);
        let merchant_fee = round_half_even(
            &(amount * &rates.merchant.percent / &hundred + &rates.merchant.flat),
            minor_units,
        );
        let super_merchant_fee =
            round_half_even(&(amount * &rates.commission_percent / &hundred), minor_units);
        let gateway_fee = round_half_even(
            &(amount * &rates.gateway.percent / &hundred + &rates.gateway.flat),
            minor_units,
        );

        let gross = amount.with_scale(minor_units);
        let net_amount = &gross - &merchant_fee - &super_merchant_fee - &gateway_fee;
        if net_amount < BigDecimal::from(0) {
            return Err(ValidationError::new(
                "amount",
                "fees exceed the transaction amount",
            ));
        }

        Ok(FeeBreakdown {
            merchant_fee,
            super_merchant_fee,
            gateway_fee,
            net_amount,
            schedule_version: schedule.version,
        })
    }
}

/// Banker's rounding at the given scale. bigdecimal 0.3 only truncates,
/// so the tie handling works on the raw mantissa.
pub fn round_half_even(value: &BigDecimal, scale: i64) -> BigDecimal {
    let (mantissa, exponent) = value.as_bigint_and_exponent();
    if exponent <= scale {
        // fewer digits than requested, padding is exact
        return value.with_scale(scale);
    }

    let (negative, magnitude) = match mantissa.sign() {
        Sign::Minus => (true, -mantissa),
        _ => (false, mantissa),
    };
    let divisor = pow10(exponent - scale);
    let quotient = &magnitude / &divisor;
    let remainder = &magnitude % &divisor;

    let two = BigInt::from(2);
    let twice_remainder = &remainder * &two;
    let round_up = match twice_remainder.cmp(&divisor) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        // exact tie: round towards the even neighbour
        std::cmp::Ordering::Equal => &quotient % &two == BigInt::from(1),
    };

    let rounded = if round_up {
        quotient + BigInt::from(1)
    } else {
        quotient
    };
    let signed = if negative { -rounded } else { rounded };
    BigDecimal::new(signed, scale)
}

fn pow10(digits: i64) -> BigInt {
    let mut result = BigInt::from(1);
    let ten = BigInt::from(10);
    for _ in 0..digits {
        result *= &ten;
    }
    result
}

/// Source of the schedule in force. Kept behind a trait so the engine
/// does not care whether rates come from a static document, an ops
/// console, or a remote config service.
#[async_trait]
pub trait FeeScheduleProvider: Send + Sync {
    async fn current_schedule(&self) -> Arc<FeeSchedule>;
}

/// In-process provider over an atomically swappable document. Reloads
/// take effect for the next charge without a restart.
pub struct StaticScheduleProvider {
    schedule: ArcSwap<FeeSchedule>,
}

impl StaticScheduleProvider {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self {
            schedule: ArcSwap::from_pointee(schedule),
        }
    }

    pub fn install(&self, schedule: FeeSchedule) {
        self.schedule.store(Arc::new(schedule));
    }
}

#[async_trait]
impl FeeScheduleProvider for StaticScheduleProvider {
    async fn current_schedule(&self) -> Arc<FeeSchedule> {
        self.schedule.load_full()
    }
}
