//! Display data for rendering a cart.

use std::fmt;

use rust_decimal::Decimal;

use duka_core::{CurrencyCode, Money};

use crate::model::{Cart, CartItem};
use crate::service::{CartOutcome, CartSource};

/// Counts above this are shown as `99+`.
const BADGE_MAX: u32 = 99;

/// Format an amount as a price string, e.g. `KSh 1299.00`.
#[must_use]
pub fn format_money(amount: Decimal, currency: CurrencyCode) -> String {
    Money::new(amount, currency).display()
}

/// Text for the cart count badge. Empty when the cart is empty.
#[must_use]
pub fn count_badge(item_count: u32) -> String {
    match item_count {
        0 => String::new(),
        n if n > BADGE_MAX => format!("{BADGE_MAX}+"),
        n => n.to_string(),
    }
}

/// Line display data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemView {
    pub name: String,
    pub variant: Option<String>,
    pub quantity: u32,
    pub price: String,
    pub line_price: String,
    pub image: Option<String>,
}

impl CartItemView {
    fn from_item(item: &CartItem, currency: CurrencyCode) -> Self {
        let name = if item.name.is_empty() {
            item.product_id.to_string()
        } else {
            item.name.clone()
        };
        Self {
            name,
            variant: item.variant.as_ref().map(ToString::to_string),
            quantity: item.quantity,
            price: format_money(item.unit_price, currency),
            line_price: format_money(item.line_total().unwrap_or(Decimal::MAX), currency),
            image: item.image_ref.clone(),
        }
    }
}

/// Cart display data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub discount: Option<String>,
    pub tax: String,
    pub shipping: String,
    pub total: String,
    pub item_count: u32,
    pub coupon: Option<String>,
    /// Set when the cart is a fallback and may be out of date.
    pub notice: Option<&'static str>,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        let currency = cart.totals.currency;
        let totals = &cart.totals;
        Self {
            items: cart
                .items
                .iter()
                .map(|item| CartItemView::from_item(item, currency))
                .collect(),
            subtotal: format_money(totals.subtotal, currency),
            discount: (totals.discount > Decimal::ZERO)
                .then(|| format_money(totals.discount, currency)),
            tax: format_money(totals.tax, currency),
            shipping: if totals.shipping.is_zero() && !cart.is_empty() {
                "Free".to_string()
            } else {
                format_money(totals.shipping, currency)
            },
            total: format_money(totals.total, currency),
            item_count: totals.item_count,
            coupon: cart.coupon().map(|c| c.code.to_string()),
            notice: None,
        }
    }
}

impl From<&CartOutcome> for CartView {
    fn from(outcome: &CartOutcome) -> Self {
        let mut view = Self::from(&outcome.cart);
        view.notice = match outcome.source {
            CartSource::CachedSnapshot => Some("Showing your last saved cart"),
            CartSource::GuestSnapshot => Some("Showing the cart saved on this device"),
            CartSource::DegradedToGuest => Some("You were signed out"),
            CartSource::Guest | CartSource::Server => None,
        };
        view
    }
}

/// One-line cart summary, e.g. `3 items · KSh 1500.00 (SAVE10)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSummary {
    pub item_count: u32,
    pub total: Money,
    pub coupon: Option<String>,
    pub authoritative: bool,
}

impl CartSummary {
    #[must_use]
    pub fn badge(&self) -> String {
        count_badge(self.item_count)
    }
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self {
            item_count: cart.totals.item_count,
            total: Money::new(cart.totals.total, cart.totals.currency),
            coupon: cart.coupon().map(|c| c.code.to_string()),
            authoritative: true,
        }
    }
}

impl From<&CartOutcome> for CartSummary {
    fn from(outcome: &CartOutcome) -> Self {
        Self {
            authoritative: outcome.is_authoritative(),
            ..Self::from(&outcome.cart)
        }
    }
}

impl fmt::Display for CartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.item_count == 0 {
            f.write_str("Cart is empty")?;
        } else {
            let noun = if self.item_count == 1 { "item" } else { "items" };
            write!(f, "{} {noun} · {}", self.item_count, self.total)?;
        }
        if let Some(code) = &self.coupon {
            write!(f, " ({code})")?;
        }
        if !self.authoritative {
            f.write_str(" [offline]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use duka_core::{CouponCode, ProductId};

    use super::*;
    use crate::config::PricingPolicy;
    use crate::model::{Coupon, CouponKind, OwnerMode, line_id_for};
    use crate::totals::TotalsCalculator;

    fn cart(lines: &[(&str, i64, u32)]) -> Cart {
        let items: Vec<CartItem> = lines
            .iter()
            .map(|(product, price, quantity)| {
                let product_id = ProductId::new(*product);
                CartItem {
                    id: line_id_for(&product_id, None),
                    product_id,
                    name: format!("Product {product}"),
                    sku: String::new(),
                    unit_price: Decimal::from(*price),
                    quantity: *quantity,
                    variant: None,
                    image_ref: None,
                    product: None,
                }
            })
            .collect();
        let calculator =
            TotalsCalculator::new(PricingPolicy::untaxed_free_shipping(CurrencyCode::KES));
        Cart {
            owner_mode: OwnerMode::Guest,
            totals: calculator.compute(&items, Decimal::ZERO),
            items,
            applied_coupons: Vec::new(),
            last_activity: None,
        }
    }

    #[test]
    fn test_format_money() {
        assert_eq!(
            format_money(Decimal::new(29_99, 2), CurrencyCode::KES),
            "KSh 29.99"
        );
        assert_eq!(format_money(Decimal::from(5), CurrencyCode::USD), "$ 5.00");
    }

    #[test]
    fn test_count_badge() {
        assert_eq!(count_badge(0), "");
        assert_eq!(count_badge(7), "7");
        assert_eq!(count_badge(99), "99");
        assert_eq!(count_badge(150), "99+");
    }

    #[test]
    fn test_cart_view() {
        let cart = cart(&[("p1", 500, 2), ("p2", 250, 1)]);
        let view = CartView::from(&cart);
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[0].name, "Product p1");
        assert_eq!(view.items[0].line_price, "KSh 1000.00");
        assert_eq!(view.subtotal, "KSh 1250.00");
        assert_eq!(view.shipping, "Free");
        assert_eq!(view.discount, None);
        assert_eq!(view.item_count, 3);
        assert_eq!(view.notice, None);
    }

    #[test]
    fn test_fallback_view_has_notice() {
        let outcome = CartOutcome::new(cart(&[("p1", 10, 1)]), CartSource::CachedSnapshot);
        assert!(CartView::from(&outcome).notice.is_some());
    }

    #[test]
    fn test_summary_line() {
        let mut cart = cart(&[("p1", 500, 2), ("p2", 500, 1)]);
        assert_eq!(CartSummary::from(&cart).to_string(), "3 items · KSh 1500.00");

        cart.applied_coupons.push(Coupon {
            code: CouponCode::parse("save10").unwrap(),
            kind: CouponKind::Percentage,
            computed_discount: Decimal::from(150),
        });
        let outcome = CartOutcome::new(cart, CartSource::GuestSnapshot);
        assert_eq!(
            CartSummary::from(&outcome).to_string(),
            "3 items · KSh 1500.00 (SAVE10) [offline]"
        );
    }

    #[test]
    fn test_empty_summary() {
        let summary = CartSummary::from(&Cart::empty(OwnerMode::Guest, CurrencyCode::KES));
        assert_eq!(summary.to_string(), "Cart is empty");
        assert_eq!(summary.badge(), "");
    }
}
