//! `HttpCartGateway` against the fake backend over real HTTP.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use rust_decimal::Decimal;

use duka_cart::{AddItemRequest, CartGateway, CouponKind, GatewayError, VariantKey};
use duka_core::{CouponCode, ProductId};
use duka_integration_tests::FakeBackend;

fn shuka(quantity: i64) -> AddItemRequest {
    AddItemRequest::new("p-shuka", quantity, Decimal::from(1500)).with_name("Maasai Shuka")
}

#[tokio::test]
async fn test_get_empty_cart() {
    let backend = FakeBackend::start().await;
    let cart = backend.gateway().get_cart().await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.totals.total, Decimal::ZERO);
    assert_eq!(backend.requests(), ["GET /cart"]);
}

#[tokio::test]
async fn test_add_item_returns_normalized_cart() {
    let backend = FakeBackend::start().await;
    let cart = backend.gateway().add_item(&shuka(2)).await.unwrap();

    assert_eq!(cart.items.len(), 1);
    let line = &cart.items[0];
    assert_eq!(line.product_id.as_str(), "p-shuka");
    assert_eq!(line.name, "Maasai Shuka");
    assert_eq!(line.quantity, 2);
    assert_eq!(line.unit_price, Decimal::from(1500));

    // 3000 subtotal, 16% tax, flat shipping below 5000
    assert_eq!(cart.totals.subtotal, Decimal::from(3000));
    assert_eq!(cart.totals.tax, Decimal::from(480));
    assert_eq!(cart.totals.shipping, Decimal::from(300));
    assert_eq!(cart.totals.total, Decimal::from(3780));
    assert_eq!(cart.totals.item_count, 2);
}

#[tokio::test]
async fn test_update_and_remove() {
    let backend = FakeBackend::start().await;
    let gateway = backend.gateway();
    let product = ProductId::new("p-shuka");
    gateway.add_item(&shuka(1)).await.unwrap();

    let cart = gateway.update_item(&product, 5, None).await.unwrap();
    assert_eq!(cart.items[0].quantity, 5);

    let cart = gateway.remove_item(&product, None).await.unwrap();
    assert!(cart.is_empty());
    assert!(backend.lines().is_empty());
}

#[tokio::test]
async fn test_variants_are_separate_lines() {
    let backend = FakeBackend::start().await;
    let gateway = backend.gateway();
    let red = VariantKey::new("red");
    gateway.add_item(&shuka(1).with_variant("red")).await.unwrap();
    let cart = gateway.add_item(&shuka(1).with_variant("blue")).await.unwrap();
    assert_eq!(cart.items.len(), 2);

    let cart = gateway
        .remove_item(&ProductId::new("p-shuka"), Some(&red))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].variant.as_ref().unwrap().as_str(), "blue");
}

#[tokio::test]
async fn test_update_missing_line_is_not_found() {
    let backend = FakeBackend::start().await;
    let err = backend
        .gateway()
        .update_item(&ProductId::new("nope"), 2, None)
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::NotFound);
}

#[tokio::test]
async fn test_clear() {
    let backend = FakeBackend::start().await;
    backend.seed("p1", Decimal::from(100), 3);
    let cart = backend.gateway().clear().await.unwrap();
    assert!(cart.is_empty());
    assert!(backend.lines().is_empty());
}

#[tokio::test]
async fn test_coupon_apply_and_remove() {
    let backend = FakeBackend::start().await;
    let gateway = backend.gateway();
    gateway.add_item(&shuka(2)).await.unwrap();

    let code = CouponCode::parse("save10").unwrap();
    let result = gateway.apply_coupon(&code).await.unwrap();
    assert_eq!(result.savings, Some(Decimal::from(300)));
    assert_eq!(result.cart.totals.discount, Decimal::from(300));
    let coupon = result.cart.coupon().unwrap();
    assert_eq!(coupon.code, code);
    assert_eq!(coupon.kind, CouponKind::Percentage);

    let cart = gateway.remove_coupon(&code).await.unwrap();
    assert!(cart.applied_coupons.is_empty());
    assert_eq!(cart.totals.discount, Decimal::ZERO);
    assert_eq!(backend.coupon(), None);
}

#[tokio::test]
async fn test_rejected_coupon_is_a_400() {
    let backend = FakeBackend::start().await;
    let gateway = backend.gateway();
    gateway.add_item(&shuka(1)).await.unwrap();

    let err = gateway
        .apply_coupon(&CouponCode::parse("BOGUS").unwrap())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Server {
            status: Some(400),
            message: "Invalid coupon code".to_string(),
        }
    );
}

#[tokio::test]
async fn test_missing_cart_is_not_found() {
    let backend = FakeBackend::start().await;
    backend.without_cart();
    assert_eq!(
        backend.gateway().get_cart().await.unwrap_err(),
        GatewayError::NotFound
    );
}

#[tokio::test]
async fn test_expired_session_is_unauthorized() {
    let backend = FakeBackend::start().await;
    backend.expire_sessions();
    assert_eq!(
        backend.gateway().add_item(&shuka(1)).await.unwrap_err(),
        GatewayError::Unauthorized
    );
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let backend = FakeBackend::start().await;
    let gateway = backend.gateway_with(None, Duration::from_secs(5));
    assert_eq!(gateway.get_cart().await.unwrap_err(), GatewayError::Unauthorized);
}

#[tokio::test]
async fn test_server_error_keeps_status_and_message() {
    let backend = FakeBackend::start().await;
    backend.fail_with(503);
    let err = backend.gateway().get_cart().await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Server {
            status: Some(503),
            message: "Backend unavailable".to_string(),
        }
    );
}

#[tokio::test]
async fn test_timeout_is_a_server_error_without_status() {
    let backend = FakeBackend::start().await;
    backend.set_delay(Duration::from_millis(500));
    let gateway = backend.gateway_with(Some(duka_integration_tests::TOKEN), Duration::from_millis(50));

    let err = gateway.get_cart().await.unwrap_err();
    assert_eq!(err.status(), None);
    assert!(matches!(err, GatewayError::Server { ref message, .. } if message == "request timed out"));
}
