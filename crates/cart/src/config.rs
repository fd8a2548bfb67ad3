//! Cart engine configuration.
//!
//! Plain structs with sensible defaults. Binaries load overrides from the
//! environment and pass the result to [`crate::CartService::new`].

use std::time::Duration;

use rust_decimal::Decimal;

use duka_core::CurrencyCode;

use crate::error::ValidationError;

/// Local storage key the guest cart is persisted under.
pub const GUEST_CART_KEY: &str = "guest_cart";

/// Per-cart limits enforced before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLimits {
    /// Highest quantity a single line may hold.
    pub max_quantity: u32,
    /// Highest number of distinct lines.
    pub max_unique_items: usize,
    /// Highest unit price a line may carry.
    pub max_unit_price: Decimal,
}

impl CartLimits {
    /// One billion in the cart currency.
    pub const DEFAULT_MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

    /// Check a unit price against `0..=max_unit_price`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::PriceOutOfRange` outside that range.
    pub fn check_price(&self, price: Decimal) -> Result<(), ValidationError> {
        if price < Decimal::ZERO || price > self.max_unit_price {
            return Err(ValidationError::PriceOutOfRange {
                price,
                max: self.max_unit_price,
            });
        }
        Ok(())
    }
}

impl Default for CartLimits {
    fn default() -> Self {
        Self {
            max_quantity: 99,
            max_unique_items: 50,
            max_unit_price: Self::DEFAULT_MAX_UNIT_PRICE,
        }
    }
}

/// Shipping charge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Decimal,
    /// Flat charge below the threshold.
    pub default_shipping: Decimal,
    /// Express delivery doubles the flat charge.
    pub express: bool,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Decimal::from(5000),
            default_shipping: Decimal::from(300),
            express: false,
        }
    }
}

/// Everything the totals calculation depends on besides the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Tax rate as a fraction (0.16 is 16 %).
    pub tax_rate: Decimal,
    pub shipping: ShippingPolicy,
    pub currency: CurrencyCode,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(16, 2),
            shipping: ShippingPolicy::default(),
            currency: CurrencyCode::default(),
        }
    }
}

impl PricingPolicy {
    /// No tax and no shipping. Useful for previews and fixtures.
    #[must_use]
    pub fn untaxed_free_shipping(currency: CurrencyCode) -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            shipping: ShippingPolicy {
                free_shipping_threshold: Decimal::ZERO,
                default_shipping: Decimal::ZERO,
                express: false,
            },
            currency,
        }
    }
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    pub limits: CartLimits,
    pub pricing: PricingPolicy,
    /// How long the last authoritative server cart may be shown as a
    /// fallback when the server is unreachable.
    pub snapshot_ttl: Duration,
    /// Guest storage key.
    pub storage_key: String,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            limits: CartLimits::default(),
            pricing: PricingPolicy::default(),
            snapshot_ttl: Duration::from_secs(600),
            storage_key: GUEST_CART_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CartConfig::default();
        assert_eq!(config.limits.max_quantity, 99);
        assert_eq!(config.limits.max_unique_items, 50);
        assert_eq!(config.limits.max_unit_price, Decimal::from(1_000_000_000));
        assert_eq!(config.pricing.tax_rate, Decimal::new(16, 2));
        assert_eq!(config.storage_key, "guest_cart");
    }

    #[test]
    fn test_price_range() {
        let limits = CartLimits::default();
        assert!(limits.check_price(Decimal::ZERO).is_ok());
        assert!(limits.check_price(Decimal::from(1_000_000_000)).is_ok());
        assert!(limits.check_price(Decimal::from(-1)).is_err());
        assert_eq!(
            limits.check_price(Decimal::MAX),
            Err(ValidationError::PriceOutOfRange {
                price: Decimal::MAX,
                max: Decimal::from(1_000_000_000),
            })
        );
    }

    #[test]
    fn test_untaxed_free_shipping() {
        let policy = PricingPolicy::untaxed_free_shipping(CurrencyCode::USD);
        assert_eq!(policy.tax_rate, Decimal::ZERO);
        assert_eq!(policy.shipping.default_shipping, Decimal::ZERO);
        assert_eq!(policy.currency, CurrencyCode::USD);
    }
}
