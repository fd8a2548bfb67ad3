//! Payload normalization.
//!
//! Backends and guest storage produce several cart shapes:
//!
//! - a success envelope: `{"status": "success", "data": {"cart": {...}}}`
//! - a bare cart object: `{"items": [...], "totals": {...}}`
//! - nothing at all (`null`, an error envelope, garbage)
//!
//! [`normalize`] turns any of them into a well-formed [`Cart`]. It never
//! fails: anything it can't make sense of becomes an empty cart. Normalizing
//! an already normalized cart is a no-op.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::{Map, Value};
use tracing::debug;

use duka_core::{CouponCode, CurrencyCode, LineId, ProductId, round_money};

use crate::config::CartLimits;
use crate::model::{
    Cart, CartItem, Coupon, CouponKind, OwnerMode, ProductSnapshot, Totals, VariantKey,
    line_id_for,
};
use crate::totals::subtotal_of;

type Object = Map<String, Value>;

/// Caller context the payload itself can't tell us.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext {
    pub owner_mode: OwnerMode,
    /// Used when the payload carries no currency.
    pub currency: CurrencyCode,
    /// Line quantities are clamped to this.
    pub max_quantity: u32,
    /// Lines priced above this are dropped as corrupt.
    pub max_unit_price: Decimal,
}

impl NormalizeContext {
    #[must_use]
    pub const fn new(owner_mode: OwnerMode, currency: CurrencyCode, max_quantity: u32) -> Self {
        Self {
            owner_mode,
            currency,
            max_quantity,
            max_unit_price: CartLimits::DEFAULT_MAX_UNIT_PRICE,
        }
    }

    /// Override the unit price ceiling.
    #[must_use]
    pub const fn with_max_unit_price(mut self, max_unit_price: Decimal) -> Self {
        self.max_unit_price = max_unit_price;
        self
    }
}

/// The shapes a raw cart payload can take.
#[derive(Debug, Clone, Copy)]
pub enum CartPayload<'a> {
    /// `{status, data: {cart}}`
    Envelope(&'a Object),
    /// `{items, totals}`
    Direct(&'a Object),
    /// Nothing usable.
    Empty,
}

impl<'a> CartPayload<'a> {
    fn cart(self) -> Option<&'a Object> {
        match self {
            Self::Envelope(cart) | Self::Direct(cart) => Some(cart),
            Self::Empty => None,
        }
    }
}

/// Classify a raw payload without interpreting its contents.
#[must_use]
pub fn parse_payload(raw: &Value) -> CartPayload<'_> {
    let Some(obj) = raw.as_object() else {
        return CartPayload::Empty;
    };

    if obj.get("status").and_then(Value::as_str) == Some("error") {
        return CartPayload::Empty;
    }

    if let Some(data) = obj.get("data") {
        let Some(data) = data.as_object() else {
            return CartPayload::Empty;
        };
        return match data.get("cart") {
            Some(cart) => cart
                .as_object()
                .map_or(CartPayload::Empty, CartPayload::Envelope),
            None if looks_like_cart(data) => CartPayload::Envelope(data),
            None => CartPayload::Empty,
        };
    }

    if let Some(cart) = obj.get("cart") {
        return cart
            .as_object()
            .map_or(CartPayload::Empty, CartPayload::Envelope);
    }

    if looks_like_cart(obj) {
        CartPayload::Direct(obj)
    } else {
        CartPayload::Empty
    }
}

fn looks_like_cart(obj: &Object) -> bool {
    obj.contains_key("items") || obj.contains_key("totals")
}

/// Normalize any cart payload into a [`Cart`].
#[must_use]
pub fn normalize(raw: &Value, ctx: &NormalizeContext) -> Cart {
    let Some(obj) = parse_payload(raw).cart() else {
        return Cart::empty(ctx.owner_mode, ctx.currency);
    };

    let items = normalize_items(obj.get("items"), ctx);
    let currency = obj
        .get("totals")
        .and_then(|t| t.get("currency"))
        .or_else(|| obj.get("currency"))
        .and_then(Value::as_str)
        .and_then(|c| CurrencyCode::from_str(c).ok())
        .unwrap_or(ctx.currency);
    let totals = normalize_totals(obj.get("totals").and_then(Value::as_object), &items, currency);
    let applied_coupons = normalize_coupons(obj);
    let last_activity = ["lastActivity", "updatedAt", "updated_at"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(parse_timestamp));

    Cart {
        owner_mode: ctx.owner_mode,
        items,
        totals,
        applied_coupons,
        last_activity,
    }
}

// =============================================================================
// Items
// =============================================================================

fn normalize_items(raw: Option<&Value>, ctx: &NormalizeContext) -> Vec<CartItem> {
    let Some(raw) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut items: Vec<CartItem> = Vec::with_capacity(raw.len());
    for value in raw {
        let Some(item) = normalize_item(value, ctx) else {
            debug!("Skipping unusable cart line");
            continue;
        };

        // Duplicate lines are folded into the first occurrence
        if let Some(existing) = items
            .iter_mut()
            .find(|i| i.matches(&item.product_id, item.variant.as_ref()))
        {
            existing.quantity = existing
                .quantity
                .saturating_add(item.quantity)
                .min(ctx.max_quantity);
        } else {
            items.push(item);
        }
    }
    items
}

fn normalize_item(value: &Value, ctx: &NormalizeContext) -> Option<CartItem> {
    let obj = value.as_object()?;

    let (product_id, snapshot) = product_reference(obj)?;

    let quantity = match obj.get("quantity") {
        None | Some(Value::Null) => 1,
        Some(q) => {
            let q = parse_integer(q).unwrap_or(1);
            if q <= 0 {
                return None;
            }
            u32::try_from(q).unwrap_or(u32::MAX).min(ctx.max_quantity)
        }
    };

    let variant = obj.get("variant").and_then(variant_key);

    let unit_price = ["unitPrice", "price"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(parse_decimal))
        .map_or(Decimal::ZERO, |p| p.max(Decimal::ZERO));
    if unit_price > ctx.max_unit_price {
        debug!(%product_id, %unit_price, "Dropping line priced above the ceiling");
        return None;
    }

    let id = ["id", "_id"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(scalar_string))
        .map_or_else(|| line_id_for(&product_id, variant.as_ref()), LineId::new);

    let name = string_field(obj, "name")
        .or_else(|| snapshot.as_ref().and_then(|s| s.name.clone()))
        .unwrap_or_default();
    let sku = string_field(obj, "sku").unwrap_or_default();
    let image_ref = string_field(obj, "imageRef")
        .or_else(|| obj.get("image").and_then(image_url))
        .or_else(|| snapshot.as_ref().and_then(|s| s.image.clone()));

    Some(CartItem {
        id,
        product_id,
        name,
        sku,
        unit_price,
        quantity,
        variant,
        image_ref,
        product: snapshot,
    })
}

/// Resolve the product id and, when the reference is an object, its
/// display snapshot.
fn product_reference(obj: &Object) -> Option<(ProductId, Option<ProductSnapshot>)> {
    let scalar = ["productId", "product_id"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(scalar_string));

    let product_obj = ["productId", "product"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_object));

    let snapshot = product_obj.map(snapshot_from);

    let id = scalar.or_else(|| {
        product_obj.and_then(|p| {
            ["_id", "id"]
                .iter()
                .find_map(|key| p.get(*key).and_then(scalar_string))
        })
    })?;

    if id.trim().is_empty() {
        return None;
    }

    Some((ProductId::new(id), snapshot.filter(|s| *s != ProductSnapshot::default())))
}

fn snapshot_from(product: &Object) -> ProductSnapshot {
    ProductSnapshot {
        name: string_field(product, "name"),
        price: product
            .get("price")
            .and_then(parse_decimal)
            .map(|p| p.max(Decimal::ZERO)),
        image: product
            .get("image")
            .and_then(image_url)
            .or_else(|| {
                product
                    .get("images")
                    .and_then(Value::as_array)
                    .and_then(|images| images.first())
                    .and_then(image_url)
            }),
    }
}

fn variant_key(value: &Value) -> Option<VariantKey> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(VariantKey::new(s.as_str())),
        Value::Object(o) if o.is_empty() => None,
        // Keys of serde_json maps are sorted, so this is canonical
        other => Some(VariantKey::new(other.to_string())),
    }
}

// =============================================================================
// Totals
// =============================================================================

fn normalize_totals(raw: Option<&Object>, items: &[CartItem], currency: CurrencyCode) -> Totals {
    let item_count = items
        .iter()
        .fold(0_u32, |acc, item| acc.saturating_add(item.quantity));
    let unique_item_count = u32::try_from(items.len()).unwrap_or(u32::MAX);

    let derived = || {
        let subtotal = round_money(subtotal_of(items));
        Totals {
            subtotal,
            total: subtotal,
            item_count,
            unique_item_count,
            ..Totals::zero(currency)
        }
    };

    let Some(raw) = raw else {
        return derived();
    };

    let amount = |key: &str| {
        raw.get(key)
            .and_then(parse_decimal)
            .map_or(Decimal::ZERO, |v| round_money(v.max(Decimal::ZERO)))
    };

    let mut totals = Totals {
        subtotal: amount("subtotal"),
        tax: amount("tax"),
        shipping: amount("shipping"),
        discount: amount("discount"),
        total: raw
            .get("total")
            .and_then(parse_decimal)
            .map_or(Decimal::ZERO, round_money),
        item_count,
        unique_item_count,
        currency,
    };

    let Some(expected) = totals.checked_expected_total() else {
        debug!("Reported totals overflow, deriving them from the items");
        return derived();
    };
    if totals.total != expected {
        debug!(
            reported = %totals.total,
            %expected,
            "Repairing cart total that doesn't add up"
        );
        totals.total = expected;
    }

    totals
}

// =============================================================================
// Coupons
// =============================================================================

fn normalize_coupons(obj: &Object) -> Vec<Coupon> {
    let list = ["appliedCoupons", "coupons"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array));
    let raw: Vec<&Value> = match (list, obj.get("coupon")) {
        (Some(list), _) => list.iter().collect(),
        (_, Some(single)) if !single.is_null() => vec![single],
        _ => Vec::new(),
    };

    let mut coupons: Vec<Coupon> = Vec::new();
    for coupon in raw.into_iter().filter_map(normalize_coupon) {
        if !coupons.iter().any(|c| c.code == coupon.code) {
            coupons.push(coupon);
        }
    }
    coupons
}

fn normalize_coupon(value: &Value) -> Option<Coupon> {
    let obj = value.as_object()?;
    let code = obj
        .get("code")
        .and_then(Value::as_str)
        .and_then(|c| CouponCode::parse(c).ok())?;

    let kind = ["kind", "type"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .and_then(coupon_kind)?;

    let computed_discount = ["computedDiscount", "discount", "amount"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(parse_decimal))
        .map_or(Decimal::ZERO, |d| round_money(d.max(Decimal::ZERO)));

    Some(Coupon {
        code,
        kind,
        computed_discount,
    })
}

fn coupon_kind(raw: &str) -> Option<CouponKind> {
    match raw.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
        "percentage" | "percent" => Some(CouponKind::Percentage),
        "fixed" | "fixedamount" => Some(CouponKind::Fixed),
        "freeshipping" => Some(CouponKind::FreeShipping),
        _ => None,
    }
}

// =============================================================================
// Scalars
// =============================================================================

pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| Decimal::from_f64(f.trunc()))
                .and_then(|d| d.to_i64())
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(obj: &Object, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => string_field(o, "url"),
        _ => None,
    }
}
