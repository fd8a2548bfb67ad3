//! Type-safe money representation using decimal arithmetic.
//!
//! Amounts are kept in the currency's standard unit (shillings, dollars)
//! and only rounded when a final figure is produced, see [`round_money`].

use core::fmt;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places money amounts are rounded to.
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to two decimal places, half-up.
///
/// Midpoints round away from zero, which is half-up for the non-negative
/// amounts carts deal in.
///
/// ```rust
/// # use duka_core::round_money;
/// # use rust_decimal::Decimal;
/// assert_eq!(round_money(Decimal::new(10_005, 3)), Decimal::new(1_001, 2));
/// ```
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// An amount with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit (e.g., shillings, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Money {
    /// Create a new amount.
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

    /// Format for display (e.g., "KSh 1,299.00" is rendered as "KSh 1299.00").
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{} {:.2}",
            self.currency_code.symbol(),
            round_money(self.amount)
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// ISO 4217 currency codes the storefront prices in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    KES,
    UGX,
    TZS,
    USD,
    EUR,
    GBP,
}

impl CurrencyCode {
    /// Three-letter ISO code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::KES => "KES",
            Self::UGX => "UGX",
            Self::TZS => "TZS",
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::KES => "KSh",
            Self::UGX => "USh",
            Self::TZS => "TSh",
            Self::USD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned for an unknown currency code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown currency code: {0}")]
pub struct UnknownCurrency(pub String);

impl FromStr for CurrencyCode {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KES" => Ok(Self::KES),
            "UGX" => Ok(Self::UGX),
            "TZS" => Ok(Self::TZS),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            _ => Err(UnknownCurrency(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(Decimal::new(2_995, 3)), Decimal::new(300, 2));
        assert_eq!(round_money(Decimal::new(2_994, 3)), Decimal::new(299, 2));
        assert_eq!(round_money(Decimal::new(125, 3)), Decimal::new(13, 2));
    }

    #[test]
    fn test_money_display() {
        let price = Money::new(Decimal::new(2_999, 2), CurrencyCode::KES);
        assert_eq!(price.display(), "KSh 29.99");

        let whole = Money::new(Decimal::from(1000), CurrencyCode::USD);
        assert_eq!(whole.to_string(), "$ 1000.00");
    }

    #[test]
    fn test_currency_from_str_is_case_insensitive() {
        assert_eq!("kes".parse::<CurrencyCode>(), Ok(CurrencyCode::KES));
        assert_eq!(" USD ".parse::<CurrencyCode>(), Ok(CurrencyCode::USD));
        assert!("XYZ".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_currency_default_is_kes() {
        assert_eq!(CurrencyCode::default(), CurrencyCode::KES);
    }
}
