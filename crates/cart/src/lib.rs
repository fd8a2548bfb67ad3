//! Duka cart engine.
//!
//! Keeps one logical shopping cart consistent across two stores: a guest
//! cart persisted on the device and a server cart tied to an account.
//!
//! # Architecture
//!
//! - [`normalize`] - Turns any cart payload into a [`Cart`], never fails
//! - [`totals`] - Subtotal, tax, shipping, and discount arithmetic
//! - [`coupon`] - Coupon rules and discount calculation
//! - [`guest`] - Guest cart persisted through a [`storage::GuestStorage`]
//! - [`gateway`] - REST client for the server cart
//! - [`service`] - Routes operations by session state, handles fallbacks
//! - [`sync`] - Moves the guest cart into the server cart after login
//!
//! # Example
//!
//! ```rust,ignore
//! let guest = GuestCartStore::new(storage, &config, CouponEngine::default());
//! let service = CartService::new(gateway, guest, config);
//!
//! service.add_item(&AddItemRequest::new("p1", 2, price)).await?;
//! let report = service.login(account).await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod coupon;
pub mod display;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod guest;
pub mod model;
pub mod normalize;
pub mod service;
pub mod storage;
pub mod sync;
pub mod totals;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{CartConfig, CartLimits, PricingPolicy, ShippingPolicy};
pub use coupon::CouponEngine;
pub use error::{CartError, ValidationError};
pub use gateway::{CartGateway, GatewayError, HttpCartGateway, HttpGatewayConfig};
pub use guest::{CartEvent, GuestCartStore};
pub use model::{AddItemRequest, Cart, CartItem, Coupon, CouponKind, OwnerMode, Totals, VariantKey};
pub use service::{CartOutcome, CartService, CartSource, SessionState};
pub use storage::{FileStorage, GuestStorage, MemoryStorage, StorageError};
pub use sync::{SyncCoordinator, SyncReport};
pub use totals::TotalsCalculator;
