//! Currency canonicalization and conversion
//!
//! Canonicalization maps the symbols, words, and codes the extraction
//! collaborator produces onto ISO 4217 codes through a fixed lookup.
//! Conversion is a pluggable provider: the engine never guesses rates,
//! and a missing conversion path is a data condition for the caller to
//! surface, not an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Currency symbols recognized on the extraction boundary.
const SYMBOL_TABLE: &[(&str, &str)] = &[
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("₽", "RUB"),
    ("₩", "KRW"),
    ("₪", "ILS"),
    ("₦", "NGN"),
    ("₨", "PKR"),
];

/// Word forms occasionally emitted instead of a code.
const WORD_TABLE: &[(&str, &str)] = &[
    ("dollar", "USD"),
    ("dollars", "USD"),
    ("usd", "USD"),
    ("euro", "EUR"),
    ("euros", "EUR"),
    ("eur", "EUR"),
    ("pound", "GBP"),
    ("pounds", "GBP"),
    ("sterling", "GBP"),
    ("gbp", "GBP"),
    ("yen", "JPY"),
    ("jpy", "JPY"),
    ("rupee", "INR"),
    ("rupees", "INR"),
    ("inr", "INR"),
];

/// ISO codes accepted as-is.
const KNOWN_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "INR", "RUB", "KRW", "ILS", "NGN", "PKR", "CAD", "AUD", "CHF",
    "CNY", "SEK", "NOK", "DKK", "PLN", "CZK", "HUF",
];

/// Canonicalize an extracted currency token to an ISO 4217 code.
///
/// Returns `None` when the token is unrecognized; the normalizer then
/// falls back to the client's prior currency or flags the record.
pub fn canonicalize(raw: &str) -> Option<&'static str> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }

    for (symbol, code) in SYMBOL_TABLE {
        if token.contains(symbol) {
            return Some(code);
        }
    }

    let lowered = token.to_lowercase();
    for (word, code) in WORD_TABLE {
        if lowered == *word {
            return Some(code);
        }
    }

    let upper = token.to_uppercase();
    KNOWN_CODES.iter().find(|c| **c == upper).copied()
}

/// Pluggable conversion rate source.
pub trait RateProvider: Send + Sync {
    /// Rate multiplying an amount in `from` into `to`, if a path exists.
    fn rate(&self, from: &str, to: &str) -> Option<f64>;

    /// Convert an amount between currencies. Same-currency conversion is
    /// always the identity.
    fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(amount);
        }
        self.rate(from, to).map(|r| amount * r)
    }
}

/// Table-backed rate provider, loadable from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixedRateProvider {
    /// Direct rates keyed by (from, to)
    rates: HashMap<String, f64>,
}

impl FixedRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rate and its inverse.
    pub fn with_rate(mut self, from: &str, to: &str, rate: f64) -> Self {
        self.rates.insert(Self::key(from, to), rate);
        if rate > 0.0 {
            self.rates.insert(Self::key(to, from), 1.0 / rate);
        }
        self
    }

    fn key(from: &str, to: &str) -> String {
        format!("{}:{}", from, to)
    }
}

impl RateProvider for FixedRateProvider {
    fn rate(&self, from: &str, to: &str) -> Option<f64> {
        self.rates.get(&Self::key(from, to)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_symbols_words_codes() {
        assert_eq!(canonicalize("$"), Some("USD"));
        assert_eq!(canonicalize("€"), Some("EUR"));
        assert_eq!(canonicalize("euros"), Some("EUR"));
        assert_eq!(canonicalize("gbp"), Some("GBP"));
        assert_eq!(canonicalize("JPY"), Some("JPY"));
        assert_eq!(canonicalize("doubloons"), None);
        assert_eq!(canonicalize(""), None);
    }

    #[test]
    fn test_fixed_rates_and_inverse() {
        let rates = FixedRateProvider::new().with_rate("EUR", "USD", 1.10);
        let converted = rates.convert(100.0, "EUR", "USD").unwrap();
        assert!((converted - 110.0).abs() < 1e-9);
        let back = rates.convert(110.0, "USD", "EUR").unwrap();
        assert!((back - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_currency_is_identity() {
        let rates = FixedRateProvider::new();
        assert_eq!(rates.convert(42.0, "USD", "USD"), Some(42.0));
    }

    #[test]
    fn test_missing_path() {
        let rates = FixedRateProvider::new();
        assert_eq!(rates.convert(42.0, "EUR", "USD"), None);
    }
}
