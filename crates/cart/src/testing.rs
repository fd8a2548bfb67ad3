//! Test doubles.
//!
//! [`FakeGateway`] is an in-memory server cart. It follows the backend's
//! semantics (lines merge, quantity 0 removes, unknown coupons get a 400)
//! and can be scripted to fail individual operations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use duka_core::{CouponCode, ProductId};

use crate::config::{CartLimits, PricingPolicy};
use crate::coupon::CouponEngine;
use crate::fallback::CartOperation;
use crate::gateway::{CartGateway, CouponResult, GatewayError};
use crate::model::{
    AddItemRequest, Cart, CartItem, Coupon, OwnerMode, VariantKey, line_id_for,
};
use crate::totals::TotalsCalculator;

#[derive(Default)]
struct FakeState {
    items: Vec<CartItem>,
    coupons: Vec<Coupon>,
    /// `GET /cart` answers 404 until the first mutation.
    missing: bool,
    /// Scripted outcomes per call; `None` lets the call through.
    queued: HashMap<CartOperation, VecDeque<Option<GatewayError>>>,
    persistent: HashMap<CartOperation, GatewayError>,
    calls: Vec<CartOperation>,
    latency: Option<Duration>,
}

/// Scripted in-memory [`CartGateway`].
pub struct FakeGateway {
    state: Mutex<FakeState>,
    calculator: TotalsCalculator,
    coupons: CouponEngine,
    limits: CartLimits,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    /// An existing, empty server cart with untaxed, free-shipping pricing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pricing(PricingPolicy::untaxed_free_shipping(
            duka_core::CurrencyCode::KES,
        ))
    }

    /// An empty server cart priced with `pricing`.
    #[must_use]
    pub fn with_pricing(pricing: PricingPolicy) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            calculator: TotalsCalculator::new(pricing),
            coupons: CouponEngine::default(),
            limits: CartLimits::default(),
        }
    }

    /// The account has no cart until the first mutation.
    #[must_use]
    pub fn without_cart(self) -> Self {
        self.lock().missing = true;
        self
    }

    /// Seed the server cart.
    pub fn seed(&self, requests: &[AddItemRequest]) {
        let mut state = self.lock();
        for request in requests {
            Self::merge(&mut state.items, request, self.limits.max_quantity);
        }
        state.missing = false;
    }

    /// Fail the next unscripted call of `op` with `error`.
    pub fn fail_next(&self, op: CartOperation, error: GatewayError) {
        self.lock().queued.entry(op).or_default().push_back(Some(error));
    }

    /// Let the next unscripted call of `op` through. Combine with
    /// [`Self::fail_next`] to fail a later call.
    pub fn succeed_next(&self, op: CartOperation) {
        self.lock().queued.entry(op).or_default().push_back(None);
    }

    /// Fail every call of `op` with `error` until [`Self::recover`].
    pub fn fail_always(&self, op: CartOperation, error: GatewayError) {
        self.lock().persistent.insert(op, error);
    }

    /// Drop all scripted failures.
    pub fn recover(&self) {
        let mut state = self.lock();
        state.queued.clear();
        state.persistent.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Operations called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CartOperation> {
        self.lock().calls.clone()
    }

    /// How often `op` was called.
    #[must_use]
    pub fn call_count(&self, op: CartOperation) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Current server lines.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.lock().items.clone()
    }

    /// A server-side timeout.
    #[must_use]
    pub fn timeout() -> GatewayError {
        GatewayError::Server {
            status: None,
            message: "request timed out".to_string(),
        }
    }

    /// A 5xx response.
    #[must_use]
    pub fn unavailable() -> GatewayError {
        GatewayError::Server {
            status: Some(503),
            message: "Service Unavailable".to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, wait out the latency, and return a scripted
    /// failure if one is due.
    async fn enter(&self, op: CartOperation) -> Result<(), GatewayError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(op);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(scripted) = state.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return scripted.map_or(Ok(()), Err);
        }
        if let Some(error) = state.persistent.get(&op) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn merge(items: &mut Vec<CartItem>, request: &AddItemRequest, max: u32) {
        let quantity = u32::try_from(request.quantity.max(0)).unwrap_or(max);
        if let Some(line) = items
            .iter_mut()
            .find(|i| i.matches(&request.product_id, request.variant.as_ref()))
        {
            line.quantity = line.quantity.saturating_add(quantity).min(max);
            return;
        }
        if quantity == 0 {
            return;
        }
        items.push(CartItem {
            id: line_id_for(&request.product_id, request.variant.as_ref()),
            product_id: request.product_id.clone(),
            name: request.name.clone(),
            sku: request.sku.clone(),
            unit_price: request.price.max(Decimal::ZERO),
            quantity: quantity.min(max),
            variant: request.variant.clone(),
            image_ref: request.image.clone(),
            product: None,
        });
    }

    fn cart(&self, state: &mut FakeState) -> Cart {
        let (totals, applied) = self
            .coupons
            .reprice(&self.calculator, &state.items, &state.coupons);
        state.coupons.clone_from(&applied);
        Cart {
            owner_mode: OwnerMode::Authenticated,
            items: state.items.clone(),
            totals,
            applied_coupons: applied,
            last_activity: Some(Utc::now()),
        }
    }

    fn mutate<F>(&self, f: F) -> Result<Cart, GatewayError>
    where
        F: FnOnce(&mut FakeState) -> Result<(), GatewayError>,
    {
        let mut state = self.lock();
        state.missing = false;
        f(&mut state)?;
        Ok(self.cart(&mut state))
    }
}

#[async_trait]
impl CartGateway for FakeGateway {
    async fn get_cart(&self) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::Get).await?;
        let mut state = self.lock();
        if state.missing {
            return Err(GatewayError::NotFound);
        }
        Ok(self.cart(&mut state))
    }

    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::AddItem).await?;
        let max = self.limits.max_quantity;
        self.mutate(|state| {
            Self::merge(&mut state.items, request, max);
            Ok(())
        })
    }

    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::UpdateItem).await?;
        let max = self.limits.max_quantity;
        self.mutate(|state| {
            if quantity == 0 {
                state.items.retain(|i| !i.matches(product_id, variant));
                return Ok(());
            }
            let line = state
                .items
                .iter_mut()
                .find(|i| i.matches(product_id, variant))
                .ok_or(GatewayError::NotFound)?;
            line.quantity = quantity.min(max);
            Ok(())
        })
    }

    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::RemoveItem).await?;
        self.mutate(|state| {
            state.items.retain(|i| !i.matches(product_id, variant));
            Ok(())
        })
    }

    async fn clear(&self) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::Clear).await?;
        self.mutate(|state| {
            state.items.clear();
            state.coupons.clear();
            Ok(())
        })
    }

    async fn apply_coupon(&self, code: &CouponCode) -> Result<CouponResult, GatewayError> {
        self.enter(CartOperation::ApplyCoupon).await?;
        let mut savings = None;
        let cart = self.mutate(|state| {
            let base = self.calculator.compute(&state.items, Decimal::ZERO);
            let coupon = self
                .coupons
                .apply(code.as_str(), &base)
                .map_err(|e| GatewayError::Server {
                    status: Some(400),
                    message: e.to_string(),
                })?;
            savings = Some(coupon.computed_discount);
            state.coupons = vec![coupon];
            Ok(())
        })?;
        Ok(CouponResult { cart, savings })
    }

    async fn remove_coupon(&self, code: &CouponCode) -> Result<Cart, GatewayError> {
        self.enter(CartOperation::RemoveCoupon).await?;
        self.mutate(|state| {
            state.coupons.retain(|c| &c.code != code);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_merges_and_reprices() {
        let gw = FakeGateway::new();
        gw.add_item(&AddItemRequest::new("p1", 1, Decimal::from(500)))
            .await
            .unwrap();
        let cart = gw
            .add_item(&AddItemRequest::new("p1", 1, Decimal::from(500)))
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.totals.subtotal, Decimal::from(1000));

        let result = gw
            .apply_coupon(&CouponCode::parse("SAVE10").unwrap())
            .await
            .unwrap();
        assert_eq!(result.savings, Some(Decimal::from(100)));
        assert_eq!(result.cart.totals.total, Decimal::from(900));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let gw = FakeGateway::new();
        gw.fail_next(CartOperation::Get, GatewayError::Unauthorized);
        assert_eq!(gw.get_cart().await, Err(GatewayError::Unauthorized));
        assert!(gw.get_cart().await.is_ok());

        gw.succeed_next(CartOperation::Get);
        gw.fail_next(CartOperation::Get, FakeGateway::timeout());
        assert!(gw.get_cart().await.is_ok());
        assert!(gw.get_cart().await.is_err());

        gw.fail_always(CartOperation::Clear, FakeGateway::unavailable());
        assert!(gw.clear().await.is_err());
        assert!(gw.clear().await.is_err());
        gw.recover();
        assert!(gw.clear().await.is_ok());
        assert_eq!(gw.call_count(CartOperation::Clear), 3);
    }

    #[tokio::test]
    async fn test_missing_cart_materializes_on_first_add() {
        let gw = FakeGateway::new().without_cart();
        assert_eq!(gw.get_cart().await, Err(GatewayError::NotFound));
        gw.add_item(&AddItemRequest::new("p1", 1, Decimal::ONE))
            .await
            .unwrap();
        assert_eq!(gw.get_cart().await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_coupon_is_a_400() {
        let gw = FakeGateway::new();
        gw.seed(&[AddItemRequest::new("p1", 1, Decimal::ONE)]);
        let err = gw
            .apply_coupon(&CouponCode::parse("NOPE").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }
}
