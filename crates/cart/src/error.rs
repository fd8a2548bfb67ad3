//! Error taxonomy for cart operations.
//!
//! Every public cart operation returns `Result<T, CartError>`. Validation
//! errors are produced before any I/O happens; the remaining variants mirror
//! the failure classes of the server cart gateway.

use rust_decimal::Decimal;
use thiserror::Error;

use duka_core::CouponCodeError;

use crate::gateway::GatewayError;

/// Input rejected before any storage or network access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The product id is empty.
    #[error("product id is required")]
    MissingProductId,

    /// Quantity outside `1..=max`.
    #[error("quantity {quantity} is out of range (1-{max})")]
    QuantityOutOfRange {
        /// The rejected quantity.
        quantity: i64,
        /// Highest quantity a line may hold.
        max: u32,
    },

    /// Unit price negative or above the ceiling.
    #[error("price {price} is out of range (0-{max})")]
    PriceOutOfRange {
        /// The rejected price.
        price: Decimal,
        /// Highest unit price a line may carry.
        max: Decimal,
    },

    /// Adding a new line would exceed the distinct line limit.
    #[error("cart already holds the maximum of {max} distinct items")]
    TooManyLines {
        /// Highest number of distinct lines a cart may hold.
        max: usize,
    },

    /// The line to update does not exist.
    #[error("item {product_id} is not in the cart")]
    ItemNotInCart {
        /// Product id of the missing line.
        product_id: String,
    },

    /// The coupon code is malformed.
    #[error("invalid coupon code: {0}")]
    InvalidCouponCode(#[from] CouponCodeError),
}

/// Errors returned by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Bad input, never reached storage or the network.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The server rejected the session.
    #[error("Unauthorized")]
    Unauthorized,

    /// The server has no cart for this account.
    #[error("Cart not found")]
    NotFound,

    /// Network failure, timeout, or 5xx from the cart backend.
    #[error("Server error{}: {message}", format_status(.status))]
    Server {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Diagnostic message (not shown to users).
        message: String,
    },

    /// Business rule rejection of a coupon.
    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),
}

impl CartError {
    /// Message safe to show to the shopper.
    ///
    /// Server diagnostics stay in logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::Unauthorized => "Your session has expired, please sign in again".to_string(),
            Self::NotFound => "Your cart is empty".to_string(),
            Self::Server { .. } => {
                "We couldn't update your cart right now, please try again".to_string()
            }
            Self::InvalidCoupon(code) => format!("Coupon {code} is not valid for this cart"),
        }
    }

    /// Whether repeating the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

impl From<GatewayError> for CartError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => Self::Unauthorized,
            GatewayError::NotFound => Self::NotFound,
            GatewayError::Server { status, message } => Self::Server { status, message },
        }
    }
}

fn format_status(status: &Option<u16>) -> String {
    status.map_or_else(String::new, |s| format!(" ({s})"))
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
