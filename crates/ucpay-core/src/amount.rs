//! Currency amounts and the monetary rounding rules both services share.

use serde::{Deserialize, Serialize};

/// Tolerance for comparing monetary totals computed independently on the
/// two sides of the protocol.
pub const AMOUNT_TOLERANCE: f64 = 1e-6;

/// A monetary amount with its ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    /// Three-letter currency code, e.g. `SGD`.
    pub currency: String,
    /// Value in major units.
    pub value: f64,
}

impl CurrencyAmount {
    /// Creates an amount.
    pub fn new(currency: impl Into<String>, value: f64) -> Self {
        Self {
            currency: currency.into(),
            value,
        }
    }

    /// Whether two amounts agree in currency and are within
    /// [`AMOUNT_TOLERANCE`] of each other.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.currency == other.currency && (self.value - other.value).abs() <= AMOUNT_TOLERANCE
    }
}

/// Rounds to two decimals with round-half-to-even.
///
/// This is the single rounding rule used for monetary values in canonical
/// encodings; the signer and the verifier must agree on it exactly.
#[must_use]
pub fn round_half_even_2(value: f64) -> f64 {
    let scaled = value * 100.0;
    let floor = scaled.floor();
    let frac = scaled - floor;
    // Treat values within float noise of .5 as exact halves.
    let rounded = if (frac - 0.5).abs() < 1e-9 {
        #[allow(clippy::cast_possible_truncation)]
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / 100.0
}

/// Formats a monetary value canonically: two decimals, half-to-even.
#[must_use]
pub fn format_money(value: f64) -> String {
    format!("{:.2}", round_half_even_2(value))
}

/// Converts a major-unit price to minor units (cents), as used by the UCP
/// product-search wire format.
#[must_use]
pub fn to_minor_units(value: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (round_half_even_2(value) * 100.0).round() as i64
    }
}

/// Whether a currency code is a well-formed 3-letter uppercase code.
#[must_use]
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even_2(9.98), 9.98);
        assert_eq!(round_half_even_2(0.125), 0.12);
        assert_eq!(round_half_even_2(0.135), 0.14);
        assert_eq!(round_half_even_2(2.675), 2.68);
        assert_eq!(round_half_even_2(1.005), 1.0);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(9.98), "9.98");
        assert_eq!(format_money(10.0), "10.00");
        assert_eq!(format_money(0.1 + 0.2), "0.30");
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(4.99), 499);
        assert_eq!(to_minor_units(0.0), 0);
        assert_eq!(to_minor_units(100.0), 10_000);
    }

    #[test]
    fn test_matches_within_tolerance() {
        let a = CurrencyAmount::new("SGD", 9.98);
        let b = CurrencyAmount::new("SGD", 9.980_000_4);
        assert!(a.matches(&b));

        let c = CurrencyAmount::new("SGD", 19.98);
        assert!(!a.matches(&c));

        let d = CurrencyAmount::new("USD", 9.98);
        assert!(!a.matches(&d));
    }

    #[test]
    fn test_currency_codes() {
        assert!(is_valid_currency("SGD"));
        assert!(is_valid_currency("USD"));
        assert!(!is_valid_currency("sgd"));
        assert!(!is_valid_currency("SG"));
        assert!(!is_valid_currency("SGDX"));
    }
}
