//! Coupon validation against a fixed rule table.
//!
//! A cart carries at most one coupon: applying a different code replaces the
//! previous one, and re-applying the same code recomputes its discount.

use rust_decimal::Decimal;
use tracing::debug;

use duka_core::{CouponCode, round_money};

use crate::error::CartError;
use crate::model::{CartItem, Coupon, CouponKind, Totals};
use crate::totals::TotalsCalculator;

/// One entry of the coupon rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponRule {
    pub code: CouponCode,
    pub kind: CouponKind,
    /// Rate for percentage coupons (0.10 is 10 %), amount for fixed ones,
    /// unused for free shipping.
    pub value: Decimal,
}

impl CouponRule {
    fn new(code: &str, kind: CouponKind, value: Decimal) -> Option<Self> {
        CouponCode::parse(code)
            .ok()
            .map(|code| Self { code, kind, value })
    }
}

/// Validates coupon codes and computes their discount.
#[derive(Debug, Clone)]
pub struct CouponEngine {
    rules: Vec<CouponRule>,
}

impl Default for CouponEngine {
    fn default() -> Self {
        Self::new(
            [
                CouponRule::new("SAVE10", CouponKind::Percentage, Decimal::new(10, 2)),
                CouponRule::new("SAVE20", CouponKind::Percentage, Decimal::new(20, 2)),
                CouponRule::new("KARIBU500", CouponKind::Fixed, Decimal::from(500)),
                CouponRule::new("FREESHIP", CouponKind::FreeShipping, Decimal::ZERO),
            ]
            .into_iter()
            .flatten()
            .collect(),
        )
    }
}

impl CouponEngine {
    #[must_use]
    pub const fn new(rules: Vec<CouponRule>) -> Self {
        Self { rules }
    }

    /// Look up a rule by (normalized) code.
    #[must_use]
    pub fn rule(&self, code: &CouponCode) -> Option<&CouponRule> {
        self.rules.iter().find(|r| &r.code == code)
    }

    /// Validate `code` against the current totals and compute its discount.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidCoupon` if the code is unknown or malformed,
    /// or if the cart has no items.
    pub fn apply(&self, code: &str, current: &Totals) -> Result<Coupon, CartError> {
        let parsed =
            CouponCode::parse(code).map_err(|_| CartError::InvalidCoupon(code.trim().to_string()))?;

        if current.unique_item_count == 0 {
            return Err(CartError::InvalidCoupon(parsed.into_inner()));
        }

        let Some(rule) = self.rule(&parsed) else {
            return Err(CartError::InvalidCoupon(parsed.into_inner()));
        };

        let computed_discount = match rule.kind {
            CouponKind::Percentage => round_money(current.subtotal.saturating_mul(rule.value)),
            CouponKind::Fixed => rule.value.min(current.subtotal),
            CouponKind::FreeShipping => current.shipping,
        };

        Ok(Coupon {
            code: parsed,
            kind: rule.kind,
            computed_discount,
        })
    }

    /// Recompute totals for `items`, re-validating the applied coupon.
    ///
    /// A coupon that no longer applies (for example because the cart was
    /// emptied) is dropped.
    #[must_use]
    pub fn reprice(
        &self,
        calculator: &TotalsCalculator,
        items: &[CartItem],
        applied: &[Coupon],
    ) -> (Totals, Vec<Coupon>) {
        let base = calculator.compute(items, Decimal::ZERO);

        let Some(current) = applied.last() else {
            return (base, Vec::new());
        };

        match self.apply(current.code.as_str(), &base) {
            Ok(coupon) => {
                let totals = calculator.compute(items, coupon.computed_discount);
                (totals, vec![coupon])
            }
            Err(e) => {
                debug!(code = %current.code, error = %e, "Dropping coupon that no longer applies");
                (base, Vec::new())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PricingPolicy;
    use crate::model::line_id_for;
    use duka_core::{CurrencyCode, ProductId};

    fn item(price: i64, quantity: u32) -> CartItem {
        let product_id = ProductId::new("p1");
        CartItem {
            id: line_id_for(&product_id, None),
            product_id,
            name: "Kikoy".to_string(),
            sku: "KK-1".to_string(),
            unit_price: Decimal::from(price),
            quantity,
            variant: None,
            image_ref: None,
            product: None,
        }
    }

    fn untaxed() -> TotalsCalculator {
        TotalsCalculator::new(PricingPolicy::untaxed_free_shipping(CurrencyCode::KES))
    }

    #[test]
    fn test_save10_on_1000() {
        let calc = untaxed();
        let items = vec![item(1000, 1)];
        let base = calc.compute(&items, Decimal::ZERO);

        let coupon = CouponEngine::default().apply("SAVE10", &base).unwrap();
        assert_eq!(coupon.kind, CouponKind::Percentage);
        assert_eq!(coupon.computed_discount, Decimal::from(100));

        let totals = calc.compute(&items, coupon.computed_discount);
        assert_eq!(totals.discount, Decimal::from(100));
        assert_eq!(totals.total, Decimal::from(900));
    }

    #[test]
    fn test_code_is_case_insensitive() {
        let base = untaxed().compute(&[item(200, 1)], Decimal::ZERO);
        let coupon = CouponEngine::default().apply(" save20 ", &base).unwrap();
        assert_eq!(coupon.code.as_str(), "SAVE20");
        assert_eq!(coupon.computed_discount, Decimal::from(40));
    }

    #[test]
    fn test_fixed_is_capped_at_subtotal() {
        let base = untaxed().compute(&[item(120, 2)], Decimal::ZERO);
        let coupon = CouponEngine::default().apply("KARIBU500", &base).unwrap();
        assert_eq!(coupon.computed_discount, Decimal::from(240));
    }

    #[test]
    fn test_free_shipping_equals_current_shipping() {
        let calc = TotalsCalculator::new(PricingPolicy {
            tax_rate: Decimal::ZERO,
            ..PricingPolicy::default()
        });
        let base = calc.compute(&[item(100, 1)], Decimal::ZERO);
        let coupon = CouponEngine::default().apply("FREESHIP", &base).unwrap();
        assert_eq!(coupon.computed_discount, Decimal::from(300));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let base = untaxed().compute(&[item(100, 1)], Decimal::ZERO);
        let err = CouponEngine::default().apply("BOGUS", &base).unwrap_err();
        assert!(matches!(err, CartError::InvalidCoupon(code) if code == "BOGUS"));
    }

    #[test]
    fn test_malformed_code_rejected() {
        let base = untaxed().compute(&[item(100, 1)], Decimal::ZERO);
        let err = CouponEngine::default().apply("SAVE 10", &base).unwrap_err();
        assert!(matches!(err, CartError::InvalidCoupon(_)));
    }

    #[test]
    fn test_empty_cart_rejected() {
        let base = untaxed().compute(&[], Decimal::ZERO);
        let err = CouponEngine::default().apply("SAVE10", &base).unwrap_err();
        assert!(matches!(err, CartError::InvalidCoupon(_)));
    }

    #[test]
    fn test_reprice_recomputes_instead_of_stacking() {
        let calc = untaxed();
        let engine = CouponEngine::default();
        let items = vec![item(1000, 1)];
        let base = calc.compute(&items, Decimal::ZERO);
        let applied = vec![engine.apply("SAVE10", &base).unwrap()];

        let (totals, coupons) = engine.reprice(&calc, &items, &applied);
        let (again, coupons_again) = engine.reprice(&calc, &items, &coupons);

        assert_eq!(totals.discount, Decimal::from(100));
        assert_eq!(totals, again);
        assert_eq!(coupons_again.len(), 1);
    }

    #[test]
    fn test_reprice_follows_quantity_changes() {
        let calc = untaxed();
        let engine = CouponEngine::default();
        let base = calc.compute(&[item(1000, 1)], Decimal::ZERO);
        let applied = vec![engine.apply("SAVE10", &base).unwrap()];

        let (totals, coupons) = engine.reprice(&calc, &[item(1000, 2)], &applied);
        assert_eq!(totals.discount, Decimal::from(200));
        assert_eq!(coupons.first().unwrap().computed_discount, Decimal::from(200));
    }

    #[test]
    fn test_reprice_drops_coupon_on_empty_cart() {
        let calc = untaxed();
        let engine = CouponEngine::default();
        let base = calc.compute(&[item(1000, 1)], Decimal::ZERO);
        let applied = vec![engine.apply("SAVE10", &base).unwrap()];

        let (totals, coupons) = engine.reprice(&calc, &[], &applied);
        assert!(coupons.is_empty());
        assert_eq!(totals.total, Decimal::ZERO);
    }
}
