//! Offline totals preview for a cart file.

use std::path::Path;

use serde_json::Value;

use duka_cart::normalize::{NormalizeContext, normalize};
use duka_cart::{Cart, CartConfig, CartOutcome, CartSource, CouponEngine, OwnerMode, TotalsCalculator};

use super::{CliError, print_cart};

/// Normalize the JSON cart in `path` and price it with `config`.
///
/// Stored totals are ignored; `coupon` replaces any coupon in the file.
pub fn preview(config: &CartConfig, path: &Path, coupon: Option<&str>) -> Result<(), CliError> {
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let cart = price(config, &raw, coupon)?;
    print_cart(&CartOutcome::new(cart, CartSource::Guest));
    Ok(())
}

fn price(config: &CartConfig, raw: &Value, coupon: Option<&str>) -> Result<Cart, CliError> {
    let context = NormalizeContext::new(
        OwnerMode::Guest,
        config.pricing.currency,
        config.limits.max_quantity,
    )
    .with_max_unit_price(config.limits.max_unit_price);
    let mut cart = normalize(raw, &context);

    let calculator = TotalsCalculator::new(config.pricing);
    let engine = CouponEngine::default();
    if let Some(code) = coupon {
        let base = calculator.compute(&cart.items, rust_decimal::Decimal::ZERO);
        cart.applied_coupons = vec![engine.apply(code, &base)?];
    }
    let (totals, applied) = engine.reprice(&calculator, &cart.items, &cart.applied_coupons);
    cart.totals = totals;
    cart.applied_coupons = applied;
    Ok(cart)
}
