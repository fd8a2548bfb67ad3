//! `CartService` end to end: file-backed guest cart, HTTP server cart.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;

use duka_cart::{
    AddItemRequest, CartConfig, CartError, CartService, CartSource, CouponEngine, FileStorage,
    GuestCartStore, SessionState, ValidationError,
};
use duka_core::{AccountId, ProductId};
use duka_integration_tests::FakeBackend;

fn service(backend: &FakeBackend, dir: &Path) -> CartService {
    let config = CartConfig::default();
    let guest = GuestCartStore::new(
        Arc::new(FileStorage::new(dir)),
        &config,
        CouponEngine::default(),
    );
    CartService::new(Arc::new(backend.gateway()), guest, config)
}

fn item(product: &str, quantity: i64, price: i64) -> AddItemRequest {
    AddItemRequest::new(product, quantity, Decimal::from(price))
}

#[tokio::test]
async fn test_guest_cart_survives_restart() {
    let backend = FakeBackend::start().await;
    let dir = tempfile::tempdir().unwrap();

    let first = service(&backend, dir.path());
    first.add_item(&item("p1", 2, 750)).await.unwrap();
    first.apply_coupon("SAVE10").await.unwrap();

    let second = service(&backend, dir.path());
    let outcome = second.get().await.unwrap();
    assert_eq!(outcome.source, CartSource::Guest);
    assert_eq!(outcome.cart.items.len(), 1);
    assert_eq!(outcome.cart.items[0].quantity, 2);
    assert_eq!(outcome.cart.totals.discount, Decimal::from(150));

    // Guest operations never reach the backend
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_login_moves_guest_cart_to_server() {
    let backend = FakeBackend::start().await;
    backend.seed("p2", Decimal::from(500), 1);
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());

    service.add_item(&item("p1", 2, 1000)).await.unwrap();
    service.add_item(&item("p2", 1, 500)).await.unwrap();

    let report = service.login(AccountId::new("acct-1")).await;
    assert!(report.is_complete());
    assert_eq!(report.synced, 2);

    let lines = backend.lines();
    assert_eq!(lines.len(), 2);
    let p2 = lines.iter().find(|l| l.product_id == "p2").unwrap();
    assert_eq!(p2.quantity, 2);
    assert!(service.guest().get().is_empty());

    let outcome = service.get().await.unwrap();
    assert_eq!(outcome.source, CartSource::Server);
    assert_eq!(outcome.cart.totals.item_count, 4);
    assert_eq!(service.totals_drift(&outcome.cart), Decimal::ZERO);
}

#[tokio::test]
async fn test_mutations_reread_the_full_cart() {
    let backend = FakeBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;

    let outcome = service.add_item(&item("p1", 1, 100)).await.unwrap();
    assert_eq!(outcome.source, CartSource::Server);
    assert_eq!(backend.requests(), ["POST /cart/items", "GET /cart"]);

    service
        .update_item(&ProductId::new("p1"), 0, None)
        .await
        .unwrap();
    assert!(backend.lines().is_empty());
}

#[tokio::test]
async fn test_expired_session_degrades_to_guest() {
    let backend = FakeBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;
    backend.expire_sessions();

    let outcome = service.add_item(&item("p1", 1, 100)).await.unwrap();
    assert_eq!(outcome.source, CartSource::DegradedToGuest);
    assert_eq!(service.session(), SessionState::Guest);
    assert_eq!(service.guest().get().items.len(), 1);
    assert!(backend.lines().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_serves_snapshot() {
    let backend = FakeBackend::start().await;
    backend.seed("p1", Decimal::from(100), 2);
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;

    let fresh = service.get().await.unwrap();
    assert!(fresh.is_authoritative());

    backend.fail_with(502);
    let stale = service.get().await.unwrap();
    assert_eq!(stale.source, CartSource::CachedSnapshot);
    assert!(!stale.is_authoritative());
    assert_eq!(stale.cart.items, fresh.cart.items);
    // Still signed in: only a 401 ends the session
    assert!(service.is_authenticated());
}

#[tokio::test]
async fn test_failed_mutation_leaves_cart_unchanged() {
    let backend = FakeBackend::start().await;
    backend.seed("p1", Decimal::from(100), 1);
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;
    let before = service.get().await.unwrap().cart;

    backend.fail_with(500);
    let err = service.add_item(&item("p2", 1, 100)).await.unwrap_err();
    assert!(matches!(err, CartError::Server { status: Some(500), .. }));
    assert!(err.is_retryable());
    assert_eq!(service.current(), Some(before));
}

#[tokio::test]
async fn test_rejected_coupon_is_invalid_coupon() {
    let backend = FakeBackend::start().await;
    backend.seed("p1", Decimal::from(100), 1);
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;

    let err = service.apply_coupon("BOGUS").await.unwrap_err();
    assert!(matches!(err, CartError::InvalidCoupon(code) if code == "BOGUS"));
}

#[tokio::test]
async fn test_logout_starts_an_empty_guest_cart() {
    let backend = FakeBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.add_item(&item("p1", 1, 100)).await.unwrap();
    service.login(AccountId::new("acct-1")).await;

    service.logout().await;
    let outcome = service.get().await.unwrap();
    assert_eq!(outcome.source, CartSource::Guest);
    assert!(outcome.cart.is_empty());
    // The server cart is untouched
    assert_eq!(backend.lines().len(), 1);
}

#[tokio::test]
async fn test_update_of_missing_line_is_rejected_when_signed_in() {
    let backend = FakeBackend::start().await;
    backend.seed("p1", Decimal::from(100), 1);
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;
    let before = service.get().await.unwrap().cart;

    let err = service
        .update_item(&ProductId::new("p9"), 2, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CartError::Validation(ValidationError::ItemNotInCart { .. })
    ));
    assert!(service.is_authenticated());
    assert_eq!(service.current(), Some(before));
}

#[tokio::test]
async fn test_overpriced_add_never_reaches_the_backend() {
    let backend = FakeBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let service = service(&backend, dir.path());
    service.restore_session(AccountId::new("acct-1")).await;

    let err = service
        .add_item(&item("p1", 1, 2_000_000_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CartError::Validation(ValidationError::PriceOutOfRange { .. })
    ));
    assert!(backend.requests().is_empty());
}
