//! Totals calculation.
//!
//! A pure function of the items, the discount, and the pricing policy. The
//! guest store, UI previews and the server-consistency check all go through
//! [`compute_totals`], so identical inputs always give identical totals.

use rust_decimal::Decimal;

use duka_core::{CurrencyCode, round_money};

use crate::config::{PricingPolicy, ShippingPolicy};
use crate::model::{CartItem, Totals};

/// Compute the totals for a list of line items.
///
/// The subtotal is summed at full precision and rounded once, half-up, so
/// per-line rounding errors never compound. The discount is clamped so the
/// total can't go negative; tax is charged on the discounted subtotal.
/// An empty cart is never charged shipping.
///
/// Arithmetic saturates at `Decimal::MAX` instead of panicking. Normalized
/// and validated carts stay far below it.
#[must_use]
pub fn compute_totals(
    items: &[CartItem],
    discount: Decimal,
    tax_rate: Decimal,
    shipping: &ShippingPolicy,
    currency: CurrencyCode,
) -> Totals {
    let subtotal = round_money(subtotal_of(items));

    let shipping_charge = if items.is_empty() || subtotal >= shipping.free_shipping_threshold {
        Decimal::ZERO
    } else if shipping.express {
        round_money(shipping.default_shipping.saturating_mul(Decimal::TWO))
    } else {
        round_money(shipping.default_shipping)
    };

    let discount = round_money(discount.max(Decimal::ZERO))
        .min(subtotal.saturating_add(shipping_charge));
    let tax = round_money(
        subtotal
            .saturating_sub(discount)
            .max(Decimal::ZERO)
            .saturating_mul(tax_rate),
    );
    let total = subtotal
        .saturating_sub(discount)
        .saturating_add(tax)
        .saturating_add(shipping_charge);

    let item_count = items
        .iter()
        .fold(0_u32, |acc, item| acc.saturating_add(item.quantity));
    let unique_item_count = u32::try_from(items.len()).unwrap_or(u32::MAX);

    Totals {
        subtotal,
        tax,
        shipping: shipping_charge,
        discount,
        total,
        item_count,
        unique_item_count,
        currency,
    }
}

/// Unrounded sum of the line totals, saturating on overflow.
#[must_use]
pub fn subtotal_of(items: &[CartItem]) -> Decimal {
    items.iter().fold(Decimal::ZERO, |acc, item| {
        acc.saturating_add(item.line_total().unwrap_or(Decimal::MAX))
    })
}

/// [`compute_totals`] bound to a pricing policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalsCalculator {
    policy: PricingPolicy,
}

impl TotalsCalculator {
    #[must_use]
    pub const fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    /// Compute totals for `items` with the given discount.
    #[must_use]
    pub fn compute(&self, items: &[CartItem], discount: Decimal) -> Totals {
        compute_totals(
            items,
            discount,
            self.policy.tax_rate,
            &self.policy.shipping,
            self.policy.currency,
        )
    }
}
