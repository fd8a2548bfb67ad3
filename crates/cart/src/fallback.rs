//! What the cart service does when the server cart fails.
//!
//! | Failure        | Read                  | Mutation                   |
//! |----------------|-----------------------|----------------------------|
//! | `Unauthorized` | log out, read guest   | log out, retry on guest    |
//! | `NotFound`     | empty cart            | see below                  |
//! | `Server`       | cached/guest snapshot | fail, cart left unchanged  |
//!
//! A 404 on a mutation means the account has no cart yet, or the line is
//! missing. Adds read the cart (which creates it) and retry once. Removals
//! and clears already hold: the re-read reports the empty truth. Updates
//! and coupon applications fail the way they fail on the guest cart.

use std::fmt;

use crate::gateway::GatewayError;

/// Cart operations, as seen by the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CartOperation {
    Get,
    AddItem,
    UpdateItem,
    RemoveItem,
    Clear,
    ApplyCoupon,
    RemoveCoupon,
}

impl CartOperation {
    /// Whether the operation only reads.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get)
    }

    /// Whether the operation touches coupons.
    #[must_use]
    pub const fn is_coupon(self) -> bool {
        matches!(self, Self::ApplyCoupon | Self::RemoveCoupon)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::AddItem => "add_item",
            Self::UpdateItem => "update_item",
            Self::RemoveItem => "remove_item",
            Self::Clear => "clear",
            Self::ApplyCoupon => "apply_coupon",
            Self::RemoveCoupon => "remove_coupon",
        }
    }
}

impl fmt::Display for CartOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery chosen for a failed server operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Force a logout, then run the operation against the guest cart.
    DegradeToGuest,
    /// The account has no cart yet: treat it as empty.
    TreatAsEmpty,
    /// Read the cart so the server creates it, then retry once.
    RetryAfterRead,
    /// Show the last known cart, marked as not authoritative.
    ServeSnapshot,
    /// Report the failure to the caller.
    Fail,
}

/// Pick the recovery for `error` during `operation`.
#[must_use]
pub const fn decide(operation: CartOperation, error: &GatewayError) -> FallbackDecision {
    match error {
        GatewayError::Unauthorized => FallbackDecision::DegradeToGuest,
        GatewayError::NotFound => match operation {
            CartOperation::AddItem => FallbackDecision::RetryAfterRead,
            CartOperation::UpdateItem | CartOperation::ApplyCoupon => FallbackDecision::Fail,
            CartOperation::Get
            | CartOperation::RemoveItem
            | CartOperation::Clear
            | CartOperation::RemoveCoupon => FallbackDecision::TreatAsEmpty,
        },
        GatewayError::Server { .. } if operation.is_read() => FallbackDecision::ServeSnapshot,
        GatewayError::Server { .. } => FallbackDecision::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUTATIONS: [CartOperation; 6] = [
        CartOperation::AddItem,
        CartOperation::UpdateItem,
        CartOperation::RemoveItem,
        CartOperation::Clear,
        CartOperation::ApplyCoupon,
        CartOperation::RemoveCoupon,
    ];

    fn server_error() -> GatewayError {
        GatewayError::Server {
            status: Some(503),
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_unauthorized_always_degrades() {
        for op in MUTATIONS.into_iter().chain([CartOperation::Get]) {
            assert_eq!(
                decide(op, &GatewayError::Unauthorized),
                FallbackDecision::DegradeToGuest
            );
        }
    }

    #[test]
    fn test_not_found_when_nothing_is_lost() {
        for op in [
            CartOperation::Get,
            CartOperation::RemoveItem,
            CartOperation::Clear,
            CartOperation::RemoveCoupon,
        ] {
            assert_eq!(
                decide(op, &GatewayError::NotFound),
                FallbackDecision::TreatAsEmpty
            );
        }
    }

    #[test]
    fn test_not_found_never_swallows_a_write() {
        assert_eq!(
            decide(CartOperation::AddItem, &GatewayError::NotFound),
            FallbackDecision::RetryAfterRead
        );
        assert_eq!(
            decide(CartOperation::UpdateItem, &GatewayError::NotFound),
            FallbackDecision::Fail
        );
        assert_eq!(
            decide(CartOperation::ApplyCoupon, &GatewayError::NotFound),
            FallbackDecision::Fail
        );
    }

    #[test]
    fn test_server_error_only_falls_back_for_reads() {
        assert_eq!(
            decide(CartOperation::Get, &server_error()),
            FallbackDecision::ServeSnapshot
        );
        for op in MUTATIONS {
            assert_eq!(decide(op, &server_error()), FallbackDecision::Fail);
        }
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(CartOperation::ApplyCoupon.to_string(), "apply_coupon");
        assert!(CartOperation::RemoveCoupon.is_coupon());
        assert!(!CartOperation::Clear.is_read());
    }
}
