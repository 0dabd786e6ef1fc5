//! Currency rules: minor units and Stripe's minimum charge amounts

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{BillingError, BillingResult};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Currencies Stripe charges in whole units
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Upper-case ISO code, falling back to USD when unset
pub fn normalize(code: &str) -> String {
    let code = code.trim();
    if code.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        code.to_uppercase()
    }
}

pub fn is_zero_decimal(code: &str) -> bool {
    let code = normalize(code);
    ZERO_DECIMAL_CURRENCIES.contains(&code.as_str())
}

/// Round to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a major-unit amount into the integer Stripe expects
pub fn to_minor_units(amount: Decimal, code: &str) -> BillingResult<i64> {
    let scaled = if is_zero_decimal(code) {
        amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    } else {
        (round_money(amount) * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    };

    scaled.to_i64().ok_or_else(|| {
        BillingError::InvalidInput(format!("Amount {} {} out of range", amount, code))
    })
}

/// Convert a Stripe integer amount back into major units
pub fn from_minor_units(minor: i64, code: &str) -> Decimal {
    if is_zero_decimal(code) {
        Decimal::from(minor)
    } else {
        Decimal::new(minor, 2)
    }
}

/// Smallest amount Stripe will charge in this currency (major units)
pub fn minimum_amount(code: &str) -> Decimal {
    match normalize(code).as_str() {
        "USD" | "AUD" | "BRL" | "CAD" | "CHF" | "EUR" | "INR" | "NZD" | "SGD" => {
            Decimal::new(50, 2)
        }
        "GBP" => Decimal::new(30, 2),
        "AED" => Decimal::new(200, 2),
        "BGN" => Decimal::new(100, 2),
        "CZK" => Decimal::new(1500, 2),
        "DKK" => Decimal::new(250, 2),
        "HKD" => Decimal::new(400, 2),
        "HUF" => Decimal::new(17500, 2),
        "JPY" => Decimal::from(50),
        "MXN" => Decimal::new(1000, 2),
        "MYR" => Decimal::new(200, 2),
        "NOK" => Decimal::new(300, 2),
        "PLN" => Decimal::new(200, 2),
        "RON" => Decimal::new(200, 2),
        "SEK" => Decimal::new(300, 2),
        "THB" => Decimal::new(1000, 2),
        _ => Decimal::new(50, 2),
    }
}

/// "USD 0.20" style label used in user-facing messages
pub fn format_amount(code: &str, amount: Decimal) -> String {
    format!("{} {:.2}", normalize(code), round_money(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_defaults_to_usd() {
        assert_eq!(normalize(""), "USD");
        assert_eq!(normalize("  "), "USD");
        assert_eq!(normalize("eur"), "EUR");
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec!(0.125)), dec!(0.13));
        assert_eq!(round_money(dec!(2.675)), dec!(2.68));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round_money(dec!(80)), dec!(80));
    }

    #[test]
    fn test_minor_units_two_decimal() {
        assert_eq!(to_minor_units(dec!(100.00), "usd").unwrap(), 10_000);
        assert_eq!(to_minor_units(dec!(0.5), "USD").unwrap(), 50);
        assert_eq!(to_minor_units(dec!(19.999), "EUR").unwrap(), 2_000);
    }

    #[test]
    fn test_minor_units_zero_decimal() {
        assert_eq!(to_minor_units(dec!(500), "JPY").unwrap(), 500);
        assert_eq!(from_minor_units(500, "jpy"), dec!(500));
        assert!(is_zero_decimal("krw"));
        assert!(!is_zero_decimal("usd"));
    }

    #[test]
    fn test_from_minor_units() {
        assert_eq!(from_minor_units(450, "USD"), dec!(4.50));
        assert_eq!(from_minor_units(0, "USD"), dec!(0));
    }

    #[test]
    fn test_minimum_amounts() {
        assert_eq!(minimum_amount("USD"), dec!(0.50));
        assert_eq!(minimum_amount("gbp"), dec!(0.30));
        assert_eq!(minimum_amount("HUF"), dec!(175.00));
        assert_eq!(minimum_amount("JPY"), dec!(50));
        // Unknown currencies fall back to the USD floor
        assert_eq!(minimum_amount("ZZZ"), dec!(0.50));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount("usd", dec!(0.2)), "USD 0.20");
        assert_eq!(format_amount("EUR", dec!(12.345)), "EUR 12.35");
    }
}
