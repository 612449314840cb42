//! Type-safe price representation using decimal arithmetic.
//!
//! Line totals and collection totals are always computed with [`Decimal`];
//! prices never pass through floating point once they are parsed.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// A zero amount in the given currency.
    #[must_use]
    pub const fn zero(currency_code: CurrencyCode) -> Self {
        Self::new(Decimal::ZERO, currency_code)
    }

    /// Create a price from an amount in minor units (e.g., cents).
    #[must_use]
    pub fn from_minor(minor: i64, currency_code: CurrencyCode) -> Self {
        Self::new(Decimal::new(minor, 2), currency_code)
    }

    /// The price of `quantity` units, saturating at the largest
    /// representable amount.
    #[must_use]
    pub fn times(self, quantity: u32) -> Self {
        Self::new(
            self.amount.saturating_mul(Decimal::from(quantity)),
            self.currency_code,
        )
    }

    /// The price of `quantity` units, or `None` if it is not representable.
    #[must_use]
    pub fn checked_times(self, quantity: u32) -> Option<Self> {
        self.amount
            .checked_mul(Decimal::from(quantity))
            .map(|amount| Self::new(amount, self.currency_code))
    }

    /// Add an amount of the same currency, saturating on overflow.
    ///
    /// The currency of `self` is kept; collections are single-currency.
    #[must_use]
    pub fn plus(self, other: Self) -> Self {
        Self::new(self.amount.saturating_add(other.amount), self.currency_code)
    }

    /// Add an amount of the same currency, or `None` on overflow.
    #[must_use]
    pub fn checked_plus(self, other: Self) -> Option<Self> {
        self.amount
            .checked_add(other.amount)
            .map(|amount| Self::new(amount, self.currency_code))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:.2}",
            self.currency_code.symbol(),
            self.amount.round_dp(2)
        )
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Display symbol for the currency.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_and_plus() {
        let unit = Price::from_minor(1999, CurrencyCode::USD);
        let line = unit.times(3);
        assert_eq!(line.amount, Decimal::new(5997, 2));
        let total = line.plus(Price::from_minor(1, CurrencyCode::USD));
        assert_eq!(total.amount, Decimal::new(5998, 2));
    }

    #[test]
    fn test_overflow_is_checked_or_saturated() {
        let max = Price::new(Decimal::MAX, CurrencyCode::USD);
        assert_eq!(max.checked_times(2), None);
        assert_eq!(max.checked_plus(Price::from_minor(100, CurrencyCode::USD)), None);
        assert_eq!(max.checked_times(1), Some(max));
        assert_eq!(max.times(2).amount, Decimal::MAX);
        assert_eq!(max.plus(max).amount, Decimal::MAX);
    }

    #[test]
    fn test_zero() {
        assert_eq!(Price::zero(CurrencyCode::EUR).amount, Decimal::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Price::from_minor(1999, CurrencyCode::USD).to_string(), "$19.99");
        assert_eq!(Price::from_minor(500, CurrencyCode::GBP).to_string(), "£5.00");
    }
}
