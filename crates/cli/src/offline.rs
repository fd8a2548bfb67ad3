//! Gateway used when no cart backend is configured.

use async_trait::async_trait;

use duka_cart::gateway::CouponResult;
use duka_cart::{AddItemRequest, Cart, CartGateway, GatewayError, VariantKey};
use duka_core::{CouponCode, ProductId};

/// Fails every call. Only reachable if a session was restored while
/// `CART_API_URL` is unset, which the CLI doesn't do.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

fn offline() -> GatewayError {
    GatewayError::Server {
        status: None,
        message: "no cart backend configured (set CART_API_URL)".to_string(),
    }
}

#[async_trait]
impl CartGateway for OfflineGateway {
    async fn get_cart(&self) -> Result<Cart, GatewayError> {
        Err(offline())
    }

    async fn add_item(&self, _request: &AddItemRequest) -> Result<Cart, GatewayError> {
        Err(offline())
    }

    async fn update_item(
        &self,
        _product_id: &ProductId,
        _quantity: u32,
        _variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        Err(offline())
    }

    async fn remove_item(
        &self,
        _product_id: &ProductId,
        _variant: Option<&VariantKey>,
    ) -> Result<Cart, GatewayError> {
        Err(offline())
    }

    async fn clear(&self) -> Result<Cart, GatewayError> {
        Err(offline())
    }

    async fn apply_coupon(&self, _code: &CouponCode) -> Result<CouponResult, GatewayError> {
        Err(offline())
    }

    async fn remove_coupon(&self, _code: &CouponCode) -> Result<Cart, GatewayError> {
        Err(offline())
    }
}
