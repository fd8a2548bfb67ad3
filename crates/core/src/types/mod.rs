//! Core types for Duka.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod coupon_code;
pub mod id;
pub mod price;

pub use coupon_code::{CouponCode, CouponCodeError};
pub use id::*;
pub use price::{CurrencyCode, Money, round_money};
