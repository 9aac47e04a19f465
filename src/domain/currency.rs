//! Supported settlement currencies and their ISO 4217 minor units.

/// Currencies the platform accepts, with the number of digits after the
/// decimal point that the currency actually supports. Fee rounding and
/// amount validation both key off this table.
pub const SUPPORTED_CURRENCIES: &[(&str, i64)] = &[
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("CAD", 2),
    ("AUD", 2),
    ("CHF", 2),
    ("AED", 2),
    ("SAR", 2),
    ("JPY", 0),
    ("KWD", 3),
    ("BHD", 3),
];

pub fn minor_units(code: &str) -> Option<i64> {
    SUPPORTED_CURRENCIES
        .iter()
        .find(|(currency, _)| *currency == code)
        .map(|(_, units)| *units)
}

pub fn is_supported(code: &str) -> bool {
    minor_units(code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_currencies_use_two_minor_units() {
        assert_eq!(minor_units("USD"), Some(2));
        assert_eq!(minor_units("EUR"), Some(2));
        assert_eq!(minor_units("GBP"), Some(2));
    }

    #[test]
    fn zero_and_three_decimal_currencies() {
        assert_eq!(minor_units("JPY"), Some(0));
        assert_eq!(minor_units("KWD"), Some(3));
        assert_eq!(minor_units("BHD"), Some(3));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        assert_eq!(minor_units("XYZ"), None);
        assert!(!is_supported("usd"));
    }
}
