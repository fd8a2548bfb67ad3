//! Duka Core - Shared types library.
//!
//! This crate provides common types used across all Duka components:
//! - `cart` - Cart consistency engine (guest and server carts)
//! - `cli` - Command-line shell over the cart engine
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no HTTP clients,
//! no storage. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, and coupon codes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
