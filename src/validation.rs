use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Utc};
use std::fmt;

use crate::domain::currency;

pub const CARD_NUMBER_MIN_LEN: usize = 13;
pub const CARD_NUMBER_MAX_LEN: usize = 19;
pub const CVV_MIN_LEN: usize = 3;
pub const CVV_MAX_LEN: usize = 4;
pub const CUSTOMER_NAME_MAX_LEN: usize = 255;
pub const CUSTOMER_EMAIL_MAX_LEN: usize = 255;
pub const EXTERNAL_ID_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_currency(code: &str) -> ValidationResult {
    let code = sanitize_string(code);
    validate_required("currency", &code)?;

    if !currency::is_supported(&code) {
        return Err(ValidationError::new(
            "currency",
            format!("unsupported currency: {}", code),
        ));
    }

    Ok(())
}

/// Positive and within the currency's minor-unit precision. Amounts
/// with sub-unit digits are rejected here instead of being rounded
/// away silently.
pub fn validate_amount(amount: &BigDecimal, currency_code: &str) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    if let Some(minor_units) = currency::minor_units(currency_code) {
        let (_, precision) = amount.normalized().as_bigint_and_exponent();
        if precision > minor_units {
            return Err(ValidationError::new(
                "amount",
                format!(
                    "{} supports at most {} decimal places",
                    currency_code, minor_units
                ),
            ));
        }
    }

    Ok(())
}

/// Strips the separators customers type into card fields.
pub fn normalize_card_number(card_number: &str) -> String {
    card_number
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect()
}

pub fn validate_card_number(card_number: &str) -> ValidationResult {
    let digits = normalize_card_number(card_number);
    validate_required("card_number", &digits)?;

    if digits.len() < CARD_NUMBER_MIN_LEN || digits.len() > CARD_NUMBER_MAX_LEN {
        return Err(ValidationError::new(
            "card_number",
            format!(
                "must be between {} and {} digits",
                CARD_NUMBER_MIN_LEN, CARD_NUMBER_MAX_LEN
            ),
        ));
    }

    if !luhn_check(&digits) {
        return Err(ValidationError::new("card_number", "failed checksum"));
    }

    Ok(())
}

fn luhn_check(digits: &str) -> bool {
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .filter_map(|(idx, ch)| ch.to_digit(10).map(|d| (idx, d)))
        .map(|(idx, d)| {
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// MM/YY, valid through the end of the named month.
pub fn validate_expiry(expiry: &str, now: DateTime<Utc>) -> ValidationResult {
    let expiry = sanitize_string(expiry);
    validate_required("expiry", &expiry)?;

    let (month_part, year_part) = expiry
        .split_once('/')
        .ok_or_else(|| ValidationError::new("expiry", "must be in MM/YY format"))?;

    let month: u32 = month_part
        .parse()
        .map_err(|_| ValidationError::new("expiry", "must be in MM/YY format"))?;
    if !(1..=12).contains(&month) {
        return Err(ValidationError::new("expiry", "month must be 01-12"));
    }
    if year_part.len() != 2 {
        return Err(ValidationError::new("expiry", "must be in MM/YY format"));
    }
    let year: i32 = year_part
        .parse()
        .map_err(|_| ValidationError::new("expiry", "must be in MM/YY format"))?;
    let year = 2000 + year;

    if (year, month) < (now.year(), now.month()) {
        return Err(ValidationError::new("expiry", "card has expired"));
    }

    Ok(())
}

pub fn validate_cvv(cvv: &str) -> ValidationResult {
    let cvv = sanitize_string(cvv);
    validate_required("cvv", &cvv)?;

    if cvv.len() < CVV_MIN_LEN || cvv.len() > CVV_MAX_LEN || !cvv.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(ValidationError::new("cvv", "must be 3 or 4 digits"));
    }

    Ok(())
}

pub fn validate_customer_email(email: &str) -> ValidationResult {
    let email = sanitize_string(email);
    validate_required("customer_email", &email)?;
    validate_max_len("customer_email", &email, CUSTOMER_EMAIL_MAX_LEN)?;

    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ValidationError::new(
            "customer_email",
            "must be a valid email address",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_currency_codes() {
        assert!(validate_currency("USD").is_ok());
        assert!(validate_currency("  EUR  ").is_ok());
        assert!(validate_currency("usd").is_err());
        assert!(validate_currency("XXX").is_err());
        assert!(validate_currency("").is_err());
    }

    #[test]
    fn validates_amounts() {
        assert!(validate_amount(&BigDecimal::from_str("10.50").unwrap(), "USD").is_ok());
        assert!(validate_amount(&BigDecimal::from(0), "USD").is_err());
        assert!(validate_amount(&BigDecimal::from(-3), "USD").is_err());
        assert!(validate_amount(&BigDecimal::from_str("10.123").unwrap(), "USD").is_err());
        assert!(validate_amount(&BigDecimal::from_str("100.5").unwrap(), "JPY").is_err());
        assert!(validate_amount(&BigDecimal::from_str("1.234").unwrap(), "KWD").is_ok());
    }

    #[test]
    fn validates_card_numbers() {
        assert!(validate_card_number("4242424242424242").is_ok());
        assert!(validate_card_number("4242 4242 4242 4242").is_ok());
        assert!(validate_card_number("378282246310005").is_ok());
        assert!(validate_card_number("1234").is_err());
        assert!(validate_card_number("4242424242424241").is_err(), "bad checksum");
        assert!(validate_card_number("").is_err());
        assert!(validate_card_number(&"4".repeat(20)).is_err());
    }

    #[test]
    fn validates_expiry() {
        let now = at(2026, 8);
        assert!(validate_expiry("12/30", now).is_ok());
        assert!(validate_expiry("08/26", now).is_ok(), "valid through end of month");
        assert!(validate_expiry("07/26", now).is_err());
        assert!(validate_expiry("01/20", now).is_err());
        assert!(validate_expiry("13/30", now).is_err());
        assert!(validate_expiry("00/30", now).is_err());
        assert!(validate_expiry("1230", now).is_err());
        assert!(validate_expiry("12/2030", now).is_err());
        assert!(validate_expiry("", now).is_err());
    }

    #[test]
    fn validates_cvv() {
        assert!(validate_cvv("123").is_ok());
        assert!(validate_cvv("1234").is_ok());
        assert!(validate_cvv("12").is_err());
        assert!(validate_cvv("12345").is_err());
        assert!(validate_cvv("12a").is_err());
    }

    #[test]
    fn validates_customer_email() {
        assert!(validate_customer_email("ada@example.com").is_ok());
        assert!(validate_customer_email("no-at-sign").is_err());
        assert!(validate_customer_email("@example.com").is_err());
        assert!(validate_customer_email("ada@nodot").is_err());
    }
}
