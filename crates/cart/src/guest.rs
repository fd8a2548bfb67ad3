//! Device-local guest cart.
//!
//! Every mutation works on a copy of the current cart, reprices it, then
//! commits it in memory and persists a snapshot to [`GuestStorage`]. A
//! persistence failure is reported (log + [`CartEvent::PersistFailed`]) but
//! the in-memory cart stays authoritative until a later write succeeds.
//!
//! Stores sharing one storage see each other's writes on the next read.
//! [`GuestCartStore::watch`] re-reads eagerly when another writer touches
//! the key.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use duka_core::{CouponCode, ProductId};

use crate::config::{CartConfig, CartLimits};
use crate::coupon::CouponEngine;
use crate::error::{CartError, ValidationError};
use crate::model::{
    AddItemRequest, Cart, CartItem, Coupon, OwnerMode, Totals, VariantKey, line_id_for,
};
use crate::normalize::{NormalizeContext, normalize};
use crate::storage::{GuestStorage, StorageError};
use crate::totals::TotalsCalculator;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications published by a [`GuestCartStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    /// A mutation was committed; re-read the cart.
    Changed,
    /// The last mutation could not be persisted.
    PersistFailed { reason: String },
    /// Another writer changed storage and the cart was re-read.
    Reloaded,
}

/// On-disk shape of a guest cart.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GuestSnapshot<'a> {
    items: &'a [CartItem],
    totals: &'a Totals,
    applied_coupons: &'a [Coupon],
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

struct GuestState {
    cart: Cart,
    /// The in-memory cart hasn't been persisted.
    dirty: bool,
}

struct GuestInner {
    storage: Arc<dyn GuestStorage>,
    key: String,
    writer: Uuid,
    limits: CartLimits,
    calculator: TotalsCalculator,
    coupons: CouponEngine,
    state: Mutex<GuestState>,
    events: broadcast::Sender<CartEvent>,
}

/// Guest cart backed by device-local storage.
///
/// Cloning is cheap; clones share the same cart.
#[derive(Clone)]
pub struct GuestCartStore {
    inner: Arc<GuestInner>,
}

impl std::fmt::Debug for GuestCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestCartStore")
            .field("key", &self.inner.key)
            .field("writer", &self.inner.writer)
            .finish_non_exhaustive()
    }
}

impl GuestCartStore {
    /// Open the guest cart stored under `config.storage_key`.
    #[must_use]
    pub fn new(storage: Arc<dyn GuestStorage>, config: &CartConfig, coupons: CouponEngine) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            inner: Arc::new(GuestInner {
                storage,
                key: config.storage_key.clone(),
                writer: Uuid::new_v4(),
                limits: config.limits,
                calculator: TotalsCalculator::new(config.pricing),
                coupons,
                state: Mutex::new(GuestState {
                    cart: Cart::empty(OwnerMode::Guest, config.pricing.currency),
                    dirty: false,
                }),
                events,
            }),
        };
        {
            let mut state = store.lock();
            store.refresh(&mut state);
        }
        store
    }

    /// Identifies this store's writes in storage notifications.
    #[must_use]
    pub fn writer_id(&self) -> Uuid {
        self.inner.writer
    }

    /// Subscribe to cart events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.inner.events.subscribe()
    }

    /// The current guest cart, re-read from storage when possible.
    #[must_use]
    pub fn get(&self) -> Cart {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.cart.clone()
    }

    /// Add `request.quantity` of a line, merging into an existing
    /// `(product_id, variant)` line.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank product id, a price outside
    /// `0..=max_unit_price`, or when a new line would exceed the distinct
    /// line limit.
    pub fn add_item(&self, request: &AddItemRequest) -> Result<Cart, CartError> {
        if request.product_id.is_blank() {
            return Err(ValidationError::MissingProductId.into());
        }
        let limits = self.inner.limits;
        limits.check_price(request.price)?;

        self.mutate(|cart| {
            let existing = cart
                .items
                .iter()
                .position(|i| i.matches(&request.product_id, request.variant.as_ref()));

            if let Some(pos) = existing {
                let current = cart.items.get(pos).map_or(0, |i| i64::from(i.quantity));
                let merged = current.saturating_add(request.quantity);
                if merged <= 0 {
                    cart.items.remove(pos);
                } else if let Some(line) = cart.items.get_mut(pos) {
                    line.quantity = clamp_quantity(merged, limits.max_quantity);
                }
                return Ok(());
            }

            if request.quantity <= 0 {
                return Ok(());
            }
            if cart.items.len() >= limits.max_unique_items {
                return Err(ValidationError::TooManyLines {
                    max: limits.max_unique_items,
                }
                .into());
            }

            cart.items.push(CartItem {
                id: line_id_for(&request.product_id, request.variant.as_ref()),
                product_id: request.product_id.clone(),
                name: request.name.clone(),
                sku: request.sku.clone(),
                unit_price: request.price,
                quantity: clamp_quantity(request.quantity, limits.max_quantity),
                variant: request.variant.clone(),
                image_ref: request.image.clone(),
                product: None,
            });
            Ok(())
        })
    }

    /// Set a line's quantity. A quantity of zero or less removes the line.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ItemNotInCart` when a positive quantity is
    /// set on a line that doesn't exist.
    pub fn update_item(
        &self,
        product_id: &ProductId,
        quantity: i64,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, CartError> {
        if product_id.is_blank() {
            return Err(ValidationError::MissingProductId.into());
        }
        if quantity <= 0 {
            return self.remove_item(product_id, variant);
        }
        let max = self.inner.limits.max_quantity;

        self.mutate(|cart| {
            let line = cart
                .items
                .iter_mut()
                .find(|i| i.matches(product_id, variant))
                .ok_or_else(|| ValidationError::ItemNotInCart {
                    product_id: product_id.to_string(),
                })?;
            line.quantity = clamp_quantity(quantity, max);
            Ok(())
        })
    }

    /// Remove the `(product_id, variant)` line. Removing a missing line is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank product id.
    pub fn remove_item(
        &self,
        product_id: &ProductId,
        variant: Option<&VariantKey>,
    ) -> Result<Cart, CartError> {
        if product_id.is_blank() {
            return Err(ValidationError::MissingProductId.into());
        }
        self.mutate(|cart| {
            cart.items.retain(|i| !i.matches(product_id, variant));
            Ok(())
        })
    }

    /// Empty the cart and drop its coupon.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other mutations.
    pub fn clear(&self) -> Result<Cart, CartError> {
        self.mutate(|cart| {
            cart.items.clear();
            cart.applied_coupons.clear();
            Ok(())
        })
    }

    /// Apply a coupon, replacing any coupon already applied.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidCoupon` if the code is rejected.
    pub fn apply_coupon(&self, code: &str) -> Result<Cart, CartError> {
        let engine = &self.inner.coupons;
        self.mutate(|cart| {
            let coupon = engine.apply(code, &cart.totals)?;
            cart.applied_coupons = vec![coupon];
            Ok(())
        })
    }

    /// Remove a coupon. Removing a coupon that isn't applied is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the code is malformed.
    pub fn remove_coupon(&self, code: &str) -> Result<Cart, CartError> {
        let code = CouponCode::parse(code).map_err(ValidationError::from)?;
        self.mutate(|cart| {
            cart.applied_coupons.retain(|c| c.code != code);
            Ok(())
        })
    }

    /// Re-read the cart whenever another writer changes the storage key.
    ///
    /// The task ends when the store is dropped or storage goes away.
    #[must_use]
    pub fn watch(&self) -> JoinHandle<()> {
        let mut changes = self.inner.storage.subscribe();
        let weak: Weak<GuestInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => Some(change),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Storage notifications lagged, reloading");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(inner) = weak.upgrade() else { break };
                if let Some(change) = change
                    && (change.key != inner.key || change.writer == inner.writer)
                {
                    continue;
                }
                Self { inner }.reload();
            }
        })
    }

    /// Discard unsaved state and re-read storage (last writer wins).
    fn reload(&self) {
        {
            let mut state = self.lock();
            state.dirty = false;
            self.refresh(&mut state);
        }
        let _ = self.inner.events.send(CartEvent::Reloaded);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuestState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn normalize_context(&self) -> NormalizeContext {
        NormalizeContext::new(
            OwnerMode::Guest,
            self.inner.calculator.policy().currency,
            self.inner.limits.max_quantity,
        )
        .with_max_unit_price(self.inner.limits.max_unit_price)
    }

    /// Replace the in-memory cart with the stored one unless it has unsaved
    /// changes.
    fn refresh(&self, state: &mut GuestState) {
        if state.dirty {
            return;
        }
        match self.inner.storage.read(&self.inner.key) {
            Ok(Some(raw)) => {
                let value: Value = serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!(error = %e, "Stored guest cart is not valid JSON, starting empty");
                    Value::Null
                });
                let mut cart = normalize(&value, &self.normalize_context());
                self.reprice(&mut cart);
                state.cart = cart;
            }
            Ok(None) => {
                state.cart = Cart::empty(OwnerMode::Guest, self.inner.calculator.policy().currency);
            }
            Err(e) => {
                warn!(error = %e, "Failed to read guest cart, keeping in-memory copy");
            }
        }
    }

    fn reprice(&self, cart: &mut Cart) {
        let (totals, applied) =
            self.inner
                .coupons
                .reprice(&self.inner.calculator, &cart.items, &cart.applied_coupons);
        cart.totals = totals;
        cart.applied_coupons = applied;
    }

    fn mutate<F>(&self, apply: F) -> Result<Cart, CartError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartError>,
    {
        let mut state = self.lock();
        self.refresh(&mut state);

        let mut next = state.cart.clone();
        apply(&mut next)?;
        self.reprice(&mut next);
        next.last_activity = Some(Utc::now());

        match self.persist(&next) {
            Ok(()) => state.dirty = false,
            Err(e) => {
                warn!(error = %e, key = %self.inner.key, "Failed to persist guest cart");
                state.dirty = true;
                let _ = self.inner.events.send(CartEvent::PersistFailed {
                    reason: e.to_string(),
                });
            }
        }
        state.cart = next.clone();
        drop(state);

        let _ = self.inner.events.send(CartEvent::Changed);
        Ok(next)
    }

    fn persist(&self, cart: &Cart) -> Result<(), StorageError> {
        if cart.is_empty() && cart.applied_coupons.is_empty() {
            return self.inner.storage.remove(&self.inner.key, self.inner.writer);
        }
        let snapshot = GuestSnapshot {
            items: &cart.items,
            totals: &cart.totals,
            applied_coupons: &cart.applied_coupons,
            updated_at: cart.last_activity,
        };
        let json = serde_json::to_string(&snapshot)?;
        self.inner
            .storage
            .write(&self.inner.key, &json, self.inner.writer)
    }
}

fn clamp_quantity(quantity: i64, max: u32) -> u32 {
    u32::try_from(quantity.clamp(1, i64::from(max))).unwrap_or(max)
}
