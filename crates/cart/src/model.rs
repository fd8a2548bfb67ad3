//! Cart domain types.
//!
//! These types are the single canonical representation every payload shape
//! is normalized into, whether it came from guest storage or the server.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use duka_core::{CouponCode, CurrencyCode, LineId, ProductId, define_id};

define_id!(VariantKey);

/// Who owns a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OwnerMode {
    /// Stored only on this device.
    #[default]
    Guest,
    /// Stored on the server, tied to an account.
    Authenticated,
}

/// Display-only copy of the product a line refers to.
///
/// Never used for pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProductSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A line item in the cart.
///
/// A cart never holds two lines with the same `(product_id, variant)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Line ID.
    pub id: LineId,
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Display name.
    pub name: String,
    /// Stock keeping unit.
    pub sku: String,
    /// Price per unit, never negative.
    pub unit_price: Decimal,
    /// Quantity, within `1..=max_quantity`.
    pub quantity: u32,
    /// Opaque variant key (size, colour, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantKey>,
    /// Image URL or storage key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Denormalized product details for rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductSnapshot>,
}

impl CartItem {
    /// Whether this line is the `(product_id, variant)` line.
    #[must_use]
    pub fn matches(&self, product_id: &ProductId, variant: Option<&VariantKey>) -> bool {
        &self.product_id == product_id && self.variant.as_ref() == variant
    }

    /// Unrounded `unit_price * quantity`, or `None` if it overflows.
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// A line to add, as sent to the server and applied to the guest cart.
///
/// `quantity` is signed: the guest store treats it as a delta and removes
/// the line when the merged quantity drops to zero or below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantKey>,
    #[serde(default)]
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default)]
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AddItemRequest {
    /// A request with no display details.
    #[must_use]
    pub fn new(product_id: impl Into<ProductId>, quantity: i64, price: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            variant: None,
            name: String::new(),
            price,
            sku: String::new(),
            image: None,
        }
    }

    /// Set the variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<VariantKey>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Re-add an existing line somewhere else (login sync).
    #[must_use]
    pub fn from_item(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: i64::from(item.quantity),
            variant: item.variant.clone(),
            name: item.name.clone(),
            price: item.unit_price,
            sku: item.sku.clone(),
            image: item.image_ref.clone(),
        }
    }
}

/// Stable line ID derived from the line identity.
#[must_use]
pub fn line_id_for(product_id: &ProductId, variant: Option<&VariantKey>) -> LineId {
    match variant {
        Some(variant) => LineId::new(format!("{product_id}::{variant}")),
        None => LineId::new(product_id.as_str()),
    }
}

/// Pricing summary derived from line items and coupons.
///
/// `total == subtotal - discount + tax + shipping` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Sum of line quantities.
    pub item_count: u32,
    /// Number of distinct lines.
    pub unique_item_count: u32,
    pub currency: CurrencyCode,
}

impl Totals {
    /// All-zero totals.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
            item_count: 0,
            unique_item_count: 0,
            currency,
        }
    }

    /// The total the components add up to, saturating at `Decimal::MAX`
    /// the same way [`crate::totals::compute_totals`] does.
    #[must_use]
    pub fn expected_total(&self) -> Decimal {
        self.subtotal
            .saturating_sub(self.discount)
            .saturating_add(self.tax)
            .saturating_add(self.shipping)
    }

    /// [`Self::expected_total`], or `None` if the components overflow.
    #[must_use]
    pub fn checked_expected_total(&self) -> Option<Decimal> {
        self.subtotal
            .checked_sub(self.discount)?
            .checked_add(self.tax)?
            .checked_add(self.shipping)
    }
}

/// Kind of discount a coupon grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CouponKind {
    /// Percentage of the subtotal.
    Percentage,
    /// Fixed amount, capped at the subtotal.
    Fixed,
    /// Waives the shipping charge.
    FreeShipping,
}

/// A coupon applied to a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: CouponCode,
    pub kind: CouponKind,
    /// Discount this coupon contributed at the last recompute.
    pub computed_discount: Decimal,
}

/// A shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Guest or authenticated.
    pub owner_mode: OwnerMode,
    /// Lines in insertion order.
    pub items: Vec<CartItem>,
    /// Pricing summary.
    pub totals: Totals,
    /// Applied coupons.
    pub applied_coupons: Vec<Coupon>,
    /// Last mutation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl Cart {
    /// An empty cart with zeroed totals.
    #[must_use]
    pub const fn empty(owner_mode: OwnerMode, currency: CurrencyCode) -> Self {
        Self {
            owner_mode,
            items: Vec::new(),
            totals: Totals::zero(currency),
            applied_coupons: Vec::new(),
            last_activity: None,
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find the `(product_id, variant)` line.
    #[must_use]
    pub fn find_line(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Option<&CartItem> {
        self.items.iter().find(|i| i.matches(product_id, variant))
    }

    /// Whether any line refers to `product_id`.
    #[must_use]
    pub fn contains_product(&self, product_id: &ProductId) -> bool {
        self.items.iter().any(|i| &i.product_id == product_id)
    }

    /// The coupon currently applied, if any.
    #[must_use]
    pub fn coupon(&self) -> Option<&Coupon> {
        self.applied_coupons.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, variant: Option<&str>, price: i64, quantity: u32) -> CartItem {
        let product_id = ProductId::new(product);
        let variant = variant.map(VariantKey::new);
        CartItem {
            id: line_id_for(&product_id, variant.as_ref()),
            product_id,
            name: product.to_string(),
            sku: String::new(),
            unit_price: Decimal::from(price),
            quantity,
            variant,
            image_ref: None,
            product: None,
        }
    }

    #[test]
    fn test_line_identity_includes_variant() {
        let red = item("p1", Some("red"), 10, 1);
        assert!(red.matches(&ProductId::new("p1"), Some(&VariantKey::new("red"))));
        assert!(!red.matches(&ProductId::new("p1"), None));
        assert!(!red.matches(&ProductId::new("p1"), Some(&VariantKey::new("blue"))));
    }

    #[test]
    fn test_line_id_for() {
        let product = ProductId::new("p1");
        assert_eq!(line_id_for(&product, None).as_str(), "p1");
        assert_eq!(
            line_id_for(&product, Some(&VariantKey::new("xl"))).as_str(),
            "p1::xl"
        );
    }

    #[test]
    fn test_line_total() {
        let line = item("p1", None, 250, 3);
        assert_eq!(line.line_total(), Some(Decimal::from(750)));
    }

    #[test]
    fn test_line_total_overflow_is_none() {
        let mut line = item("p1", None, 1, 2);
        line.unit_price = Decimal::MAX;
        assert_eq!(line.line_total(), None);
    }

    #[test]
    fn test_expected_total_overflow() {
        let totals = Totals {
            subtotal: Decimal::MAX,
            tax: Decimal::MAX,
            ..Totals::zero(CurrencyCode::KES)
        };
        assert_eq!(totals.checked_expected_total(), None);
        assert_eq!(totals.expected_total(), Decimal::MAX);
    }

    #[test]
    fn test_cart_serializes_camel_case() {
        let mut cart = Cart::empty(OwnerMode::Guest, CurrencyCode::KES);
        cart.items.push(item("p1", None, 5, 2));
        let json = serde_json::to_value(&cart).unwrap_or_default();
        assert_eq!(json["ownerMode"], "guest");
        assert_eq!(json["items"][0]["productId"], "p1");
        assert_eq!(json["items"][0]["unitPrice"], "5");
        assert_eq!(json["totals"]["uniqueItemCount"], 0);
        assert!(json.get("lastActivity").is_none());
    }

    #[test]
    fn test_add_item_request_wire_format() {
        let request = AddItemRequest::new("p1", 2, Decimal::new(2_999, 2))
            .with_variant("red")
            .with_name("Kikoy");
        let json = serde_json::to_value(&request).unwrap_or_default();
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["quantity"], 2);
        assert!((json["price"].as_f64().unwrap_or_default() - 29.99).abs() < 1e-9);
        assert_eq!(json["variant"], "red");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_add_item_request_from_item() {
        let line = item("p1", Some("red"), 5, 3);
        let request = AddItemRequest::from_item(&line);
        assert_eq!(request.quantity, 3);
        assert_eq!(request.price, Decimal::from(5));
        assert_eq!(request.variant, Some(VariantKey::new("red")));
    }

    #[test]
    fn test_find_line() {
        let mut cart = Cart::empty(OwnerMode::Guest, CurrencyCode::KES);
        cart.items.push(item("p1", Some("red"), 5, 2));
        assert!(
            cart.find_line(&ProductId::new("p1"), Some(&VariantKey::new("red")))
                .is_some()
        );
        assert!(cart.find_line(&ProductId::new("p1"), None).is_none());
        assert!(cart.contains_product(&ProductId::new("p1")));
    }
}
